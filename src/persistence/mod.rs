//! Durable per-team storage for [`PersistedTimerRecord`].
//!
//! The synchronizer writes through to one of these backends before updating
//! its in-memory copy, so a reload picks up where the last tab left off.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::PersistedTimerRecord;

mod file;
mod memory;

pub use file::JsonFilePersistence;
pub use memory::MemoryPersistence;

const KEY_PREFIX: &str = "timer-status";

/// Storage key for a team's record. Teams never share a key.
pub fn timer_record_key(team_id: Option<&str>) -> String {
    match team_id {
        Some(team_id) => format!("{KEY_PREFIX}-{team_id}"),
        None => format!("{KEY_PREFIX}-unassigned"),
    }
}

#[async_trait]
pub trait LocalPersistence: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PersistedTimerRecord>>;
    async fn set(&self, key: &str, record: &PersistedTimerRecord) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_team() {
        assert_eq!(timer_record_key(Some("team-a")), "timer-status-team-a");
        assert_ne!(timer_record_key(Some("team-a")), timer_record_key(Some("team-b")));
        assert_eq!(timer_record_key(None), "timer-status-unassigned");
    }
}
