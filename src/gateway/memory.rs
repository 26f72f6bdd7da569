use std::{sync::Mutex, time::Duration};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{LastLog, ServerTimerSnapshot, Source};

use super::{
    ActiveTaskUpdate, CacheInvalidator, CacheScope, ServerTimerGateway, TaskGateway, TaskPatch,
    TeamMembershipGateway, TimerRequest,
};

#[derive(Debug, Default)]
struct ServerState {
    snapshot: ServerTimerSnapshot,
    status_calls: usize,
    start_calls: usize,
    stop_calls: usize,
    toggle_calls: usize,
    sync_calls: usize,
    stop_sources: Vec<Source>,
    last_sync: Option<TimerRequest>,
    fail_start: bool,
    fail_stop: bool,
    fail_status: bool,
    failing_syncs: u32,
}

/// Timer server kept in process memory, with call counters and failure switches.
#[derive(Debug, Default)]
pub struct InMemoryTimerServer {
    state: Mutex<ServerState>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryTimerServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ServerTimerSnapshot) -> Self {
        let server = Self::default();
        server.set_snapshot(snapshot);
        server
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ServerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("timer server state poisoned"))
    }

    fn read<T>(&self, f: impl FnOnce(&ServerState) -> T) -> T {
        match self.state.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write(&self, f: impl FnOnce(&mut ServerState)) {
        match self.state.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn set_snapshot(&self, snapshot: ServerTimerSnapshot) {
        self.write(|state| state.snapshot = snapshot);
    }

    pub fn snapshot(&self) -> ServerTimerSnapshot {
        self.read(|state| state.snapshot.clone())
    }

    /// Delay every response, to let concurrent callers overlap.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    pub fn fail_start(&self, fail: bool) {
        self.write(|state| state.fail_start = fail);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.write(|state| state.fail_stop = fail);
    }

    pub fn fail_status(&self, fail: bool) {
        self.write(|state| state.fail_status = fail);
    }

    /// Make the next `count` sync calls fail.
    pub fn fail_syncs(&self, count: u32) {
        self.write(|state| state.failing_syncs = count);
    }

    pub fn status_calls(&self) -> usize {
        self.read(|state| state.status_calls)
    }

    pub fn start_calls(&self) -> usize {
        self.read(|state| state.start_calls)
    }

    pub fn stop_calls(&self) -> usize {
        self.read(|state| state.stop_calls)
    }

    pub fn toggle_calls(&self) -> usize {
        self.read(|state| state.toggle_calls)
    }

    pub fn sync_calls(&self) -> usize {
        self.read(|state| state.sync_calls)
    }

    pub fn stop_sources(&self) -> Vec<Source> {
        self.read(|state| state.stop_sources.clone())
    }

    pub fn last_sync_request(&self) -> Option<TimerRequest> {
        self.read(|state| state.last_sync.clone())
    }

    async fn simulate_latency(&self) {
        let latency = self.latency.lock().ok().and_then(|guard| *guard);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn start_log(state: &mut ServerState, request: &TimerRequest) -> ServerTimerSnapshot {
        let duration = state.snapshot.duration;
        state.snapshot = ServerTimerSnapshot::running_from(
            LastLog {
                id: Some(Uuid::new_v4().to_string()),
                source: request.source,
                task_id: request.task_id.clone(),
                employee_id: request.employee_id.clone(),
                organization_team_id: request.organization_team_id.clone(),
                started_at: Utc::now(),
                duration: 0,
            },
            duration,
        );
        state.snapshot.clone()
    }

    fn stop_log(state: &mut ServerState) -> ServerTimerSnapshot {
        if let Some(log) = state.snapshot.last_log.as_mut() {
            let elapsed = (Utc::now() - log.started_at).num_seconds().max(0);
            log.duration = elapsed;
            state.snapshot.duration += elapsed;
        }
        state.snapshot.running = false;
        state.snapshot.clone()
    }
}

#[async_trait]
impl ServerTimerGateway for InMemoryTimerServer {
    async fn get_status(&self, _request: &TimerRequest) -> Result<ServerTimerSnapshot> {
        self.simulate_latency().await;
        let mut state = self.lock()?;
        state.status_calls += 1;
        if state.fail_status {
            bail!("timer status unavailable");
        }
        Ok(state.snapshot.clone())
    }

    async fn start(&self, request: &TimerRequest) -> Result<ServerTimerSnapshot> {
        self.simulate_latency().await;
        let mut state = self.lock()?;
        state.start_calls += 1;
        if state.fail_start {
            bail!("timer start rejected");
        }
        Ok(Self::start_log(&mut state, request))
    }

    async fn stop(&self, source: Source, _request: &TimerRequest) -> Result<ServerTimerSnapshot> {
        self.simulate_latency().await;
        let mut state = self.lock()?;
        state.stop_calls += 1;
        state.stop_sources.push(source);
        if state.fail_stop {
            bail!("timer stop rejected");
        }
        if !state.snapshot.running {
            bail!("no running timer to stop");
        }
        Ok(Self::stop_log(&mut state))
    }

    async fn toggle(&self, task_id: &str, request: &TimerRequest) -> Result<ServerTimerSnapshot> {
        self.simulate_latency().await;
        let mut state = self.lock()?;
        state.toggle_calls += 1;
        if state.snapshot.running {
            Ok(Self::stop_log(&mut state))
        } else {
            let mut request = request.clone();
            request.task_id = Some(task_id.to_string());
            Ok(Self::start_log(&mut state, &request))
        }
    }

    async fn sync(&self, _source: Source, request: &TimerRequest) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.lock()?;
        state.sync_calls += 1;
        state.last_sync = Some(request.clone());
        if state.failing_syncs > 0 {
            state.failing_syncs -= 1;
            bail!("timer sync failed");
        }
        if state.snapshot.running {
            if let Some(log) = state.snapshot.last_log.as_mut() {
                log.duration = (Utc::now() - log.started_at).num_seconds().max(0);
            }
        }
        Ok(())
    }
}

/// Records every active-task update it receives.
#[derive(Debug, Default)]
pub struct RecordingMembershipGateway {
    updates: Mutex<Vec<(String, ActiveTaskUpdate)>>,
}

impl RecordingMembershipGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, ActiveTaskUpdate)> {
        self.updates
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn updates_for(&self, membership_id: &str) -> Vec<ActiveTaskUpdate> {
        self.updates()
            .into_iter()
            .filter(|(id, _)| id == membership_id)
            .map(|(_, update)| update)
            .collect()
    }
}

#[async_trait]
impl TeamMembershipGateway for RecordingMembershipGateway {
    async fn set_active_task(&self, membership_id: &str, update: ActiveTaskUpdate) -> Result<()> {
        self.updates
            .lock()
            .map_err(|_| anyhow!("membership log poisoned"))?
            .push((membership_id.to_string(), update));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingTaskGateway {
    patches: Mutex<Vec<TaskPatch>>,
}

impl RecordingTaskGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patches(&self) -> Vec<TaskPatch> {
        self.patches
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskGateway for RecordingTaskGateway {
    async fn update_task(&self, patch: TaskPatch) -> Result<()> {
        self.patches
            .lock()
            .map_err(|_| anyhow!("task log poisoned"))?
            .push(patch);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    scopes: Mutex<Vec<CacheScope>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, scope: CacheScope) -> usize {
        self.scopes
            .lock()
            .map(|guard| guard.iter().filter(|s| **s == scope).count())
            .unwrap_or(0)
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, scope: CacheScope) {
        if let Ok(mut guard) = self.scopes.lock() {
            guard.push(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task_id: &str) -> TimerRequest {
        TimerRequest {
            tenant_id: "tenant".into(),
            organization_id: "org".into(),
            organization_team_id: Some("team-a".into()),
            employee_id: Some("E1".into()),
            task_id: Some(task_id.into()),
            source: Source::Teams,
        }
    }

    #[tokio::test]
    async fn start_then_stop_records_a_log() {
        let server = InMemoryTimerServer::new();
        let started = server.start(&request("T1")).await.unwrap();
        assert!(started.running);
        assert_eq!(started.source(), Some(Source::Teams));
        assert_eq!(started.task_id(), Some("T1"));

        let stopped = server.stop(Source::Teams, &request("T1")).await.unwrap();
        assert!(!stopped.running);
        assert_eq!(server.stop_sources(), vec![Source::Teams]);
        assert!(server.stop(Source::Teams, &request("T1")).await.is_err());
        assert_eq!(server.stop_calls(), 2);
    }

    #[tokio::test]
    async fn toggle_flips_running() {
        let server = InMemoryTimerServer::new();
        assert!(server.toggle("T2", &request("T1")).await.unwrap().running);
        assert_eq!(server.snapshot().task_id(), Some("T2"));
        assert!(!server.toggle("T2", &request("T1")).await.unwrap().running);
        assert_eq!(server.toggle_calls(), 2);
    }

    #[tokio::test]
    async fn sync_failures_are_consumed() {
        let server = InMemoryTimerServer::new();
        server.fail_syncs(1);
        assert!(server.sync(Source::Teams, &request("T1")).await.is_err());
        assert!(server.sync(Source::Teams, &request("T2")).await.is_ok());
        assert_eq!(server.sync_calls(), 2);
        assert_eq!(
            server.last_sync_request().and_then(|request| request.task_id),
            Some("T2".into())
        );
    }
}
