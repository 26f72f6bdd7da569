use std::{collections::HashMap, sync::Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::PersistedTimerRecord;

use super::LocalPersistence;

/// Process-local store; records live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, PersistedTimerRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalPersistence for MemoryPersistence {
    async fn get(&self, key: &str) -> Result<Option<PersistedTimerRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("timer record store poisoned"))?;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, record: &PersistedTimerRecord) -> Result<()> {
        record.validate()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("timer record store poisoned"))?;
        records.insert(key.to_string(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_records_per_key() {
        let store = MemoryPersistence::new();
        assert!(store.get("timer-status-a").await.unwrap().is_none());

        let record = PersistedTimerRecord::started(1_000, Some("T1".into()));
        store.set("timer-status-a", &record).await.unwrap();
        store
            .set("timer-status-b", &PersistedTimerRecord::stopped(None))
            .await
            .unwrap();

        assert_eq!(store.get("timer-status-a").await.unwrap(), Some(record));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn refuses_invalid_records() {
        let store = MemoryPersistence::new();
        let invalid = PersistedTimerRecord {
            runned_date_time: 0,
            running: true,
            last_task_id: None,
        };
        assert!(store.set("k", &invalid).await.is_err());
        assert!(store.is_empty());
    }
}
