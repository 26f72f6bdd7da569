use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::{error::TimerError, models::Source};

/// Tunables for the timer synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// The source this client records time logs as.
    pub source: Source,
    pub tick_ms: u64,
    /// Window for repeated explicit stops from the same caller.
    pub stop_debounce_ms: i64,
    /// Window for stops fired by team/task switch effects racing each other.
    pub transition_debounce_ms: i64,
    pub sync_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub sync_max_retries: u32,
    pub sync_backoff_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            source: Source::Teams,
            tick_ms: 50,
            stop_debounce_ms: 500,
            transition_debounce_ms: 2_000,
            sync_interval_ms: 60_000,
            poll_interval_ms: 5_000,
            sync_max_retries: 3,
            sync_backoff_ms: 500,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> std::result::Result<(), TimerError> {
        if self.tick_ms == 0 {
            return Err(TimerError::config("tick_ms must be greater than zero"));
        }
        if self.sync_interval_ms == 0 || self.poll_interval_ms == 0 {
            return Err(TimerError::config(
                "sync and poll intervals must be greater than zero",
            ));
        }
        if self.stop_debounce_ms < 0 || self.transition_debounce_ms < 0 {
            return Err(TimerError::config("debounce windows cannot be negative"));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sync_backoff(&self) -> Duration {
        Duration::from_millis(self.sync_backoff_ms)
    }
}

/// JSON-backed settings file. A missing file yields defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<SyncSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            SyncSettings::default()
        };
        data.validate()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> SyncSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: SyncSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &SyncSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("teamtimer-settings-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_path()).unwrap();
        assert_eq!(store.settings(), SyncSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_path();
        fs::write(&path, r#"{ "source": "MOBILE", "stopDebounceMs": 10 }"#).unwrap();
        // field names are snake_case; unknown keys are ignored
        let store = SettingsStore::new(path.clone()).unwrap();
        let settings = store.settings();
        assert_eq!(settings.source, Source::Mobile);
        assert_eq!(settings.stop_debounce_ms, 500);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn update_round_trips_through_disk() {
        let path = temp_path();
        let store = SettingsStore::new(path.clone()).unwrap();
        let mut settings = store.settings();
        settings.sync_interval_ms = 30_000;
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reopened.settings(), settings);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn rejects_zero_tick() {
        let settings = SyncSettings {
            tick_ms: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(settings.validate(), Err(TimerError::Config { .. })));

        let store = SettingsStore::new(temp_path()).unwrap();
        assert!(store.update(settings).is_err());
    }
}
