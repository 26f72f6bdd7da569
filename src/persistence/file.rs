use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::warn;

use crate::models::PersistedTimerRecord;

use super::LocalPersistence;

/// All team records in one pretty-printed JSON object on disk.
///
/// The file is read once on open and rewritten on every `set`.
pub struct JsonFilePersistence {
    path: PathBuf,
    data: RwLock<HashMap<String, PersistedTimerRecord>>,
}

impl JsonFilePersistence {
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read timer records from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Discarding unreadable timer records in {}: {err}",
                    path.display()
                );
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    fn persist(&self, data: &HashMap<String, PersistedTimerRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write timer records to {}", self.path.display()))
    }
}

#[async_trait]
impl LocalPersistence for JsonFilePersistence {
    async fn get(&self, key: &str) -> Result<Option<PersistedTimerRecord>> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow!("timer record file lock poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, record: &PersistedTimerRecord) -> Result<()> {
        record.validate()?;
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("timer record file lock poisoned"))?;
        let mut next = guard.clone();
        next.insert(key.to_string(), record.clone());
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}
