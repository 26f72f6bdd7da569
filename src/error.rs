//! Error types surfaced by the timer synchronizer.
//!
//! Collaborators (gateways, persistence backends) report failures as
//! `anyhow::Error`; the synchronizer classifies them into [`TimerError`] so the
//! UI can tell "retry" apart from "the user has to do something first".

use thiserror::Error;

use crate::models::Source;

/// Why an operation cannot run against the current identity context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextIssue {
    NoTeam,
    NoActiveTask,
    TaskClosed,
    /// Tracking requires a plan for today and there is none with tasks.
    PlanRequired,
}

impl ContextIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextIssue::NoTeam => "no active team",
            ContextIssue::NoActiveTask => "no active task",
            ContextIssue::TaskClosed => "active task is closed",
            ContextIssue::PlanRequired => "a plan with tasks for today is required to track time",
        }
    }
}

#[derive(Error, Debug)]
pub enum TimerError {
    /// Another device already tracks time for this identity.
    #[error("another device is already tracking time ({owner})")]
    Verification { owner: Source },

    /// A start is still verifying the server status.
    #[error("timer verification already in progress")]
    VerificationPending,

    /// A gateway call failed.
    #[error("timer gateway request failed: {0}")]
    Network(#[source] anyhow::Error),

    /// Suppressed by the stop guard. Never surfaced past `stop()`.
    #[error("stop suppressed by debounce window")]
    RaceDebounced,

    #[error("invalid timer context: {}", .0.as_str())]
    InvalidContext(ContextIssue),

    /// The server reported a running timer without saying who runs it.
    #[error("malformed timer status: running without a last log")]
    MalformedSnapshot,

    #[error("timer persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("invalid timer settings: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, TimerError>;

impl TimerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Errors that need a user action before retrying.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::Verification { .. } | Self::InvalidContext(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::VerificationPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn verification_error_names_the_foreign_source() {
        let err = TimerError::Verification {
            owner: Source::Desktop,
        };
        assert_eq!(
            err.to_string(),
            "another device is already tracking time (DESKTOP)"
        );
        assert!(err.is_user_actionable());
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_context_display() {
        let err = TimerError::InvalidContext(ContextIssue::PlanRequired);
        assert!(err.to_string().contains("plan with tasks"));
        assert!(err.is_user_actionable());
    }

    #[test]
    fn network_errors_are_retryable() {
        let err = TimerError::Network(anyhow!("connection reset"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn debounce_is_neither_actionable_nor_retryable() {
        let err = TimerError::RaceDebounced;
        assert!(!err.is_user_actionable());
        assert!(!err.is_retryable());
    }
}
