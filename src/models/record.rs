use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::ServerTimerSnapshot;

/// Per-team bookkeeping that survives a reload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTimerRecord {
    /// Epoch milliseconds the local counter is anchored to; 0 when stopped.
    pub runned_date_time: i64,
    pub running: bool,
    pub last_task_id: Option<String>,
}

impl PersistedTimerRecord {
    pub fn started(runned_date_time: i64, last_task_id: Option<String>) -> Self {
        Self {
            // running records are never anchored at the epoch
            runned_date_time: runned_date_time.max(1),
            running: true,
            last_task_id,
        }
    }

    pub fn stopped(last_task_id: Option<String>) -> Self {
        Self {
            runned_date_time: 0,
            running: false,
            last_task_id,
        }
    }

    /// Rebuild the record from an authoritative snapshot.
    pub fn from_snapshot(snapshot: &ServerTimerSnapshot) -> Self {
        let last_task_id = snapshot.task_id().map(str::to_string);
        if snapshot.running {
            Self::started(snapshot.started_at_ms(), last_task_id)
        } else {
            Self::stopped(last_task_id)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.running && self.runned_date_time <= 0 {
            bail!("running timer record has no start time");
        }
        Ok(())
    }
}
