use serde::{Deserialize, Serialize};

use crate::models::{PersistedTimerRecord, ServerTimerSnapshot, Source};

/// Who owns the current session, seen from this client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionOwnership {
    Idle,
    RunningLocalSource,
    RunningForeignSource,
}

impl Default for SessionOwnership {
    fn default() -> Self {
        SessionOwnership::Idle
    }
}

impl SessionOwnership {
    pub fn from_snapshot(snapshot: Option<&ServerTimerSnapshot>, own: Source) -> Self {
        match snapshot {
            Some(snapshot) if snapshot.running => match snapshot.source() {
                Some(source) if source.is_foreign_to(own) => {
                    SessionOwnership::RunningForeignSource
                }
                _ => SessionOwnership::RunningLocalSource,
            },
            _ => SessionOwnership::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, SessionOwnership::Idle)
    }
}

/// In-memory state of the synchronizer.
#[derive(Debug, Clone, Default)]
pub struct TimerState {
    /// `None` until the first status fetch for the current team resolves.
    pub snapshot: Option<ServerTimerSnapshot>,
    pub record: PersistedTimerRecord,
    pub first_load_done: bool,
    pub status_fetching: bool,
    pub verifying: bool,
    /// Set while a caller assigns the active task ahead of starting the timer.
    pub assigning_task: bool,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.snapshot
            .as_ref()
            .map(|snapshot| snapshot.running)
            .unwrap_or(false)
    }

    /// Running per the snapshot, or per the stored record while no snapshot is known.
    pub fn has_live_session(&self) -> bool {
        match &self.snapshot {
            Some(snapshot) => snapshot.running,
            None => self.record.running,
        }
    }

    pub fn ownership(&self, own: Source) -> SessionOwnership {
        SessionOwnership::from_snapshot(self.snapshot.as_ref(), own)
    }

    /// Forget the server status, e.g. after a team switch.
    pub fn reset_snapshot(&mut self) {
        self.snapshot = None;
    }
}
