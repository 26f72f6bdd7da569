#![allow(dead_code)]
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use teamtimer_lib::{
    gateway::memory::{
        InMemoryTimerServer, RecordingInvalidator, RecordingMembershipGateway, RecordingTaskGateway,
    },
    models::{ActiveTask, LastLog, ServerTimerSnapshot, Source, TaskStatus, TimerContext},
    persistence::MemoryPersistence,
    settings::SyncSettings,
    timer::{Collaborators, ManualClock},
    TimerError, TimerSynchronizer,
};

pub const NOW_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub server: Arc<InMemoryTimerServer>,
    pub membership: Arc<RecordingMembershipGateway>,
    pub tasks: Arc<RecordingTaskGateway>,
    pub invalidator: Arc<RecordingInvalidator>,
    pub persistence: Arc<MemoryPersistence>,
    pub clock: Arc<ManualClock>,
    pub timer: TimerSynchronizer,
}

/// Signed-in member of team-a with an open task T1.
pub fn context() -> TimerContext {
    TimerContext {
        tenant_id: "tenant-1".into(),
        organization_id: "org-1".into(),
        employee_id: Some("emp-1".into()),
        membership_id: Some("member-a".into()),
        team_id: Some("team-a".into()),
        active_task: Some(ActiveTask::new("T1", TaskStatus::Open)),
        require_plan_to_track: false,
        has_plan_with_tasks: false,
    }
}

pub fn harness() -> Harness {
    harness_with(SyncSettings::default(), context(), InMemoryTimerServer::new())
}

pub fn harness_with(
    settings: SyncSettings,
    context: TimerContext,
    server: InMemoryTimerServer,
) -> Harness {
    try_harness_with(settings, context, server).expect("valid settings")
}

pub fn try_harness_with(
    settings: SyncSettings,
    context: TimerContext,
    server: InMemoryTimerServer,
) -> Result<Harness, TimerError> {
    let server = Arc::new(server);
    let membership = Arc::new(RecordingMembershipGateway::new());
    let tasks = Arc::new(RecordingTaskGateway::new());
    let invalidator = Arc::new(RecordingInvalidator::new());
    let persistence = Arc::new(MemoryPersistence::new());
    let clock = Arc::new(ManualClock::new(NOW_MS));

    let collaborators = Collaborators {
        timer: server.clone(),
        membership: membership.clone(),
        tasks: tasks.clone(),
        invalidator: invalidator.clone(),
        persistence: persistence.clone(),
        clock: clock.clone(),
    };

    Ok(Harness {
        timer: TimerSynchronizer::new(settings, context, collaborators)?,
        server,
        membership,
        tasks,
        invalidator,
        persistence,
        clock,
    })
}

/// A session on `task_id` that has been running for `elapsed_ms` at [`NOW_MS`].
pub fn running_snapshot(source: Source, task_id: &str, elapsed_ms: i64) -> ServerTimerSnapshot {
    let started_at = Utc
        .timestamp_millis_opt(NOW_MS - elapsed_ms)
        .single()
        .expect("valid timestamp");
    ServerTimerSnapshot::running_from(
        LastLog {
            id: Some("log-1".into()),
            source,
            task_id: Some(task_id.into()),
            employee_id: Some("emp-1".into()),
            organization_team_id: Some("team-a".into()),
            started_at,
            duration: elapsed_ms / 1_000,
        },
        3_600,
    )
}

/// Let spawned tasks and the counter ticker catch up.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}
