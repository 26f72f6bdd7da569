//! Reactions to team and task identity changes.
//!
//! The manager only decides; `TimerSynchronizer` carries out the returned
//! transition (stop call, membership write, status refetch).

use super::{guard::StopGuard, state::SessionOwnership};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamTransition {
    pub previous_team_id: Option<String>,
    pub new_team_id: Option<String>,
    /// Stop the running session before leaving the previous team.
    pub stop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTransition {
    pub previous_task_id: Option<String>,
    pub new_task_id: Option<String>,
    pub stop: bool,
}

/// Tracks the last seen team and task ids and turns changes into transitions.
///
/// The first id observed for either dimension only seeds the tracker.
#[derive(Debug, Clone)]
pub struct ContextTransitionManager {
    team_id: Option<Option<String>>,
    task_id: Option<Option<String>>,
    window_ms: i64,
}

impl ContextTransitionManager {
    pub fn new(window_ms: i64) -> Self {
        Self {
            team_id: None,
            task_id: None,
            window_ms,
        }
    }

    pub fn seed(&mut self, team_id: Option<&str>, task_id: Option<&str>) {
        self.team_id = Some(team_id.map(str::to_string));
        self.task_id = Some(task_id.map(str::to_string));
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_ref().and_then(|id| id.as_deref())
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_ref().and_then(|id| id.as_deref())
    }

    pub fn on_team_change(
        &mut self,
        new_team_id: Option<&str>,
        ownership: SessionOwnership,
        guard: &mut StopGuard,
        now_ms: i64,
    ) -> Option<TeamTransition> {
        let new_team_id = new_team_id.map(str::to_string);
        let previous = self.team_id.replace(new_team_id.clone())?;
        if previous == new_team_id {
            return None;
        }

        let stop = self.should_stop(ownership, guard, now_ms);
        Some(TeamTransition {
            previous_team_id: previous,
            new_team_id,
            stop,
        })
    }

    /// `assigning_task` is set while a caller assigns a task it is about to
    /// start; stopping here would kill the session it is starting.
    pub fn on_task_change(
        &mut self,
        new_task_id: Option<&str>,
        ownership: SessionOwnership,
        assigning_task: bool,
        guard: &mut StopGuard,
        now_ms: i64,
    ) -> Option<TaskTransition> {
        let new_task_id = new_task_id.map(str::to_string);
        let previous = self.task_id.replace(new_task_id.clone())?;
        if previous == new_task_id {
            return None;
        }

        let stop = !assigning_task && self.should_stop(ownership, guard, now_ms);
        Some(TaskTransition {
            previous_task_id: previous,
            new_task_id,
            stop,
        })
    }

    // Foreign sessions belong to another device and are never stopped from here.
    fn should_stop(&self, ownership: SessionOwnership, guard: &mut StopGuard, now_ms: i64) -> bool {
        ownership == SessionOwnership::RunningLocalSource
            && guard.should_accept(now_ms, self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> ContextTransitionManager {
        let mut manager = ContextTransitionManager::new(2_000);
        manager.seed(Some("team-a"), Some("T1"));
        manager
    }

    #[test]
    fn first_observation_is_not_an_edge() {
        let mut manager = ContextTransitionManager::new(2_000);
        let mut guard = StopGuard::new();
        assert!(manager
            .on_team_change(Some("team-a"), SessionOwnership::RunningLocalSource, &mut guard, 0)
            .is_none());
        assert_eq!(manager.team_id(), Some("team-a"));
        assert_eq!(guard.last_stop_at_ms(), None);
    }

    #[test]
    fn team_switch_stops_local_session() {
        let mut manager = seeded();
        let mut guard = StopGuard::new();
        let transition = manager
            .on_team_change(Some("team-b"), SessionOwnership::RunningLocalSource, &mut guard, 10_000)
            .unwrap();
        assert_eq!(
            transition,
            TeamTransition {
                previous_team_id: Some("team-a".into()),
                new_team_id: Some("team-b".into()),
                stop: true,
            }
        );
        assert_eq!(guard.last_stop_at_ms(), Some(10_000));
    }

    #[test]
    fn same_team_is_ignored() {
        let mut manager = seeded();
        let mut guard = StopGuard::new();
        assert!(manager
            .on_team_change(Some("team-a"), SessionOwnership::RunningLocalSource, &mut guard, 0)
            .is_none());
    }

    #[test]
    fn foreign_session_is_never_stopped() {
        let mut manager = seeded();
        let mut guard = StopGuard::new();
        let team = manager
            .on_team_change(Some("team-b"), SessionOwnership::RunningForeignSource, &mut guard, 0)
            .unwrap();
        assert!(!team.stop);

        let task = manager
            .on_task_change(Some("T2"), SessionOwnership::RunningForeignSource, false, &mut guard, 0)
            .unwrap();
        assert!(!task.stop);
        assert_eq!(guard.last_stop_at_ms(), None);
    }

    #[test]
    fn assigning_task_suppresses_stop() {
        let mut manager = seeded();
        let mut guard = StopGuard::new();
        let task = manager
            .on_task_change(Some("T2"), SessionOwnership::RunningLocalSource, true, &mut guard, 0)
            .unwrap();
        assert!(!task.stop);
        assert_eq!(task.previous_task_id.as_deref(), Some("T1"));
        assert_eq!(manager.task_id(), Some("T2"));
    }

    #[test]
    fn racing_transitions_share_the_guard() {
        let mut manager = seeded();
        let mut guard = StopGuard::new();
        let team = manager
            .on_team_change(Some("team-b"), SessionOwnership::RunningLocalSource, &mut guard, 5_000)
            .unwrap();
        let task = manager
            .on_task_change(Some("T9"), SessionOwnership::RunningLocalSource, false, &mut guard, 5_300)
            .unwrap();
        assert!(team.stop);
        assert!(!task.stop);
    }

    #[test]
    fn idle_task_switch_records_edge_without_stop() {
        let mut manager = seeded();
        let mut guard = StopGuard::new();
        let task = manager
            .on_task_change(None, SessionOwnership::Idle, false, &mut guard, 0)
            .unwrap();
        assert_eq!(task.new_task_id, None);
        assert!(!task.stop);
    }
}
