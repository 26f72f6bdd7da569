use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Ready,
    InReview,
    Blocked,
    Completed,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Ready => "ready",
            TaskStatus::InReview => "in-review",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub id: String,
    pub status: TaskStatus,
}

impl ActiveTask {
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.status != TaskStatus::Closed
    }
}

/// Who is tracking, in which team, on which task.
///
/// Owned by the synchronizer; the embedding app replaces the team and task
/// through `TimerSynchronizer::set_team` / `set_active_task` so that every
/// change goes through the transition manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerContext {
    pub tenant_id: String,
    pub organization_id: String,
    pub employee_id: Option<String>,
    /// Team membership row of the current user in `team_id`.
    pub membership_id: Option<String>,
    pub team_id: Option<String>,
    pub active_task: Option<ActiveTask>,
    pub require_plan_to_track: bool,
    pub has_plan_with_tasks: bool,
}

impl TimerContext {
    pub fn active_task_id(&self) -> Option<&str> {
        self.active_task.as_ref().map(|task| task.id.as_str())
    }

    /// Tracking is blocked when the organisation requires a plan for today and none exists.
    pub fn can_track(&self) -> bool {
        !self.require_plan_to_track || self.has_plan_with_tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_task_is_not_runnable() {
        assert!(ActiveTask::new("T1", TaskStatus::Open).is_runnable());
        assert!(!ActiveTask::new("T1", TaskStatus::Closed).is_runnable());
    }

    #[test]
    fn plan_requirement_gates_tracking() {
        let mut context = TimerContext::default();
        assert!(context.can_track());

        context.require_plan_to_track = true;
        assert!(!context.can_track());

        context.has_plan_with_tasks = true;
        assert!(context.can_track());
    }

    #[test]
    fn task_status_uses_kebab_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        assert_eq!(TaskStatus::InReview.as_str(), "in-review");
    }
}
