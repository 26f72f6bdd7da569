use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::{models::PersistedTimerRecord, persistence::LocalPersistence};

use super::Database;

fn row_to_record(row: &Row) -> Result<PersistedTimerRecord, rusqlite::Error> {
    Ok(PersistedTimerRecord {
        runned_date_time: row.get("runned_date_time")?,
        running: row.get::<_, i64>("running")? != 0,
        last_task_id: row.get("last_task_id")?,
    })
}

impl Database {
    pub async fn get_timer_record(&self, key: String) -> Result<Option<PersistedTimerRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT runned_date_time, running, last_task_id
                 FROM timer_records
                 WHERE record_key = ?1",
            )?;

            let record = stmt.query_row(params![key], row_to_record).optional()?;
            Ok(record)
        })
        .await
    }

    pub async fn upsert_timer_record(
        &self,
        key: String,
        record: PersistedTimerRecord,
    ) -> Result<()> {
        record.validate()?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO timer_records (record_key, runned_date_time, running, last_task_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(record_key) DO UPDATE SET
                     runned_date_time = excluded.runned_date_time,
                     running = excluded.running,
                     last_task_id = excluded.last_task_id,
                     updated_at = excluded.updated_at",
                params![
                    key,
                    record.runned_date_time,
                    record.running as i64,
                    record.last_task_id,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert timer record")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LocalPersistence for Database {
    async fn get(&self, key: &str) -> Result<Option<PersistedTimerRecord>> {
        self.get_timer_record(key.to_string()).await
    }

    async fn set(&self, key: &str, record: &PersistedTimerRecord) -> Result<()> {
        self.upsert_timer_record(key.to_string(), record.clone()).await
    }
}
