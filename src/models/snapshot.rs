use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// The most recent time log the server knows about for this identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: Source,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub organization_team_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Seconds recorded on this log so far.
    #[serde(default)]
    pub duration: i64,
}

/// Authoritative timer status as returned by the server.
///
/// Replaced wholesale on every gateway round trip; never patched field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimerSnapshot {
    pub running: bool,
    /// Seconds tracked today across all logs.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub last_log: Option<LastLog>,
}

impl ServerTimerSnapshot {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn running_from(last_log: LastLog, duration: i64) -> Self {
        Self {
            running: true,
            duration,
            last_log: Some(last_log),
        }
    }

    /// A running snapshot must say which source owns the session.
    pub fn is_consistent(&self) -> bool {
        !self.running || self.last_log.is_some()
    }

    pub fn source(&self) -> Option<Source> {
        self.last_log.as_ref().map(|log| log.source)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.last_log.as_ref().and_then(|log| log.task_id.as_deref())
    }

    /// Epoch milliseconds the running log started at, or 0 when stopped.
    pub fn started_at_ms(&self) -> i64 {
        match (&self.last_log, self.running) {
            (Some(log), true) => log.started_at.timestamp_millis(),
            _ => 0,
        }
    }

    /// Whether `other` differs enough to be worth merging.
    ///
    /// In deep-check mode only `running` is compared; duration ticks are noise.
    pub fn differs_from(&self, other: &ServerTimerSnapshot, deep_check: bool) -> bool {
        if deep_check {
            self.running != other.running
        } else {
            self != other
        }
    }
}
