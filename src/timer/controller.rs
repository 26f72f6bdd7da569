use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::{
    error::{ContextIssue, Result, TimerError},
    gateway::{
        ActiveTaskUpdate, CacheInvalidator, CacheScope, ServerTimerGateway, TaskGateway,
        TaskPatch, TeamMembershipGateway, TimerRequest,
    },
    models::{
        ActiveTask, PersistedTimerRecord, ServerTimerSnapshot, Source, TaskStatus, TimerContext,
    },
    persistence::{timer_record_key, LocalPersistence},
    settings::SyncSettings,
};

use super::{
    clock::{Clock, FormattedCounter, TimeCounterClock},
    guard::StopGuard,
    scheduler::{sync_with_retry, SyncScheduler},
    state::{SessionOwnership, TimerState},
    transition::ContextTransitionManager,
};

/// Everything the synchronizer talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub timer: Arc<dyn ServerTimerGateway>,
    pub membership: Arc<dyn TeamMembershipGateway>,
    pub tasks: Arc<dyn TaskGateway>,
    pub invalidator: Arc<dyn CacheInvalidator>,
    pub persistence: Arc<dyn LocalPersistence>,
    pub clock: Arc<dyn Clock>,
}

/// New team selected by the user, with its membership and current task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamSelection {
    pub team_id: Option<String>,
    pub membership_id: Option<String>,
    pub active_task: Option<ActiveTask>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(ServerTimerSnapshot),
    /// The server already reports no running timer.
    AlreadyStopped,
    /// Another stop went through inside the debounce window.
    Debounced,
}

struct Shared {
    timer: TimerState,
    context: TimerContext,
    transitions: ContextTransitionManager,
    guard: StopGuard,
}

/// Identity captured before a stop, so a team switch stops the session it is leaving.
#[derive(Clone)]
struct StopTarget {
    request: TimerRequest,
    key: String,
    context: TimerContext,
}

struct Inner {
    shared: Mutex<Shared>,
    counter: TimeCounterClock,
    scheduler: SyncScheduler,
    settings: SyncSettings,
    collaborators: Collaborators,
}

/// Keeps the local ticking clock in step with the server-side timer status.
///
/// Cheap to clone; every clone drives the same state. The embedding app builds
/// one per signed-in identity and hands it to whatever renders the timer.
#[derive(Clone)]
pub struct TimerSynchronizer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TimerSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSynchronizer")
            .field("source", &self.inner.settings.source)
            .field("counter", &self.inner.counter)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

fn timer_request(context: &TimerContext, task_id: Option<String>, source: Source) -> TimerRequest {
    TimerRequest {
        tenant_id: context.tenant_id.clone(),
        organization_id: context.organization_id.clone(),
        organization_team_id: context.team_id.clone(),
        employee_id: context.employee_id.clone(),
        task_id,
        source,
    }
}

fn checked(snapshot: ServerTimerSnapshot) -> Result<ServerTimerSnapshot> {
    if snapshot.is_consistent() {
        Ok(snapshot)
    } else {
        Err(TimerError::MalformedSnapshot)
    }
}

impl TimerSynchronizer {
    /// Fails with [`TimerError::Config`] when `settings` do not validate.
    pub fn new(
        settings: SyncSettings,
        context: TimerContext,
        collaborators: Collaborators,
    ) -> Result<Self> {
        settings.validate()?;

        let mut transitions = ContextTransitionManager::new(settings.transition_debounce_ms);
        transitions.seed(context.team_id.as_deref(), context.active_task_id());

        let counter = TimeCounterClock::new(collaborators.clock.clone(), settings.tick());
        let scheduler = SyncScheduler::new(
            collaborators.timer.clone(),
            collaborators.invalidator.clone(),
            settings.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    timer: TimerState::new(),
                    context,
                    transitions,
                    guard: StopGuard::new(),
                }),
                counter,
                scheduler,
                settings,
                collaborators,
            }),
        })
    }

    fn source(&self) -> Source {
        self.inner.settings.source
    }

    fn now_ms(&self) -> i64 {
        self.inner.collaborators.clock.now_ms()
    }

    async fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.shared.lock().await
    }

    fn invalidate(&self, scopes: &[CacheScope]) {
        for scope in scopes {
            self.inner.collaborators.invalidator.invalidate(*scope);
        }
    }

    fn stop_target(&self, shared: &Shared) -> StopTarget {
        let task_id = shared
            .timer
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.task_id().map(str::to_string))
            .or_else(|| shared.timer.record.last_task_id.clone());
        StopTarget {
            request: timer_request(&shared.context, task_id, self.source()),
            key: timer_record_key(shared.context.team_id.as_deref()),
            context: shared.context.clone(),
        }
    }

    /// Persist first, then update memory.
    async fn write_record(
        &self,
        shared: &mut Shared,
        key: &str,
        record: PersistedTimerRecord,
    ) -> Result<()> {
        self.inner
            .collaborators
            .persistence
            .set(key, &record)
            .await
            .map_err(TimerError::Persistence)?;
        if key == timer_record_key(shared.context.team_id.as_deref()) {
            shared.timer.record = record;
        }
        Ok(())
    }

    /// Adopt a server snapshot and bring the counter, record and scheduler in line.
    async fn apply_snapshot(&self, shared: &mut Shared, snapshot: ServerTimerSnapshot) -> Result<()> {
        let key = timer_record_key(shared.context.team_id.as_deref());

        if snapshot.running {
            let started_at = snapshot.started_at_ms();
            let foreign = snapshot
                .source()
                .map(|source| source.is_foreign_to(self.source()))
                .unwrap_or(false);
            let record = &shared.timer.record;
            // a foreign session is anchored where its owner started it
            let stale_anchor = foreign && started_at > 0 && record.runned_date_time != started_at;
            let stale_task =
                snapshot.task_id().is_some() && record.last_task_id.as_deref() != snapshot.task_id();

            if !record.running || stale_anchor || stale_task {
                let anchor = if started_at > 0 { started_at } else { self.now_ms() };
                let record =
                    PersistedTimerRecord::started(anchor, snapshot.task_id().map(str::to_string));
                self.write_record(shared, &key, record).await?;
                self.inner.counter.start(shared.timer.record.runned_date_time);
            } else if !self.inner.counter.is_running() {
                self.inner.counter.start(shared.timer.record.runned_date_time);
            }

            let source = snapshot.source().unwrap_or(self.source());
            let request =
                timer_request(&shared.context, snapshot.task_id().map(str::to_string), source);
            if self.inner.scheduler.request().as_ref() != Some(&request) {
                self.inner.scheduler.start(request);
            }
        } else {
            if shared.timer.record.running {
                let last_task_id = shared.timer.record.last_task_id.clone();
                self.write_record(shared, &key, PersistedTimerRecord::stopped(last_task_id))
                    .await?;
            }
            self.inner.counter.stop();
            self.inner.scheduler.stop();
        }

        shared.timer.snapshot = Some(snapshot);
        Ok(())
    }

    /// First load for the current team: reconcile the stored record with the server.
    pub async fn load(&self) -> Result<Option<ServerTimerSnapshot>> {
        let (request, key) = {
            let shared = self.lock().await;
            (
                timer_request(&shared.context, None, self.source()),
                timer_record_key(shared.context.team_id.as_deref()),
            )
        };

        let stored = self
            .inner
            .collaborators
            .persistence
            .get(&key)
            .await
            .map_err(TimerError::Persistence)?
            .filter(|record| record.validate().is_ok());

        let fetched = self.inner.collaborators.timer.get_status(&request).await;

        let mut shared = self.lock().await;
        shared.timer.first_load_done = true;
        if key != timer_record_key(shared.context.team_id.as_deref()) {
            debug!("team changed during first load; discarding result");
            return Ok(shared.timer.snapshot.clone());
        }

        match fetched.map_err(TimerError::Network).and_then(checked) {
            Ok(snapshot) => {
                let record = PersistedTimerRecord::from_snapshot(&snapshot);
                self.write_record(&mut shared, &key, record).await?;
                self.apply_snapshot(&mut shared, snapshot).await?;
                info!(
                    "Timer loaded for team {:?}: running={}",
                    shared.context.team_id,
                    shared.timer.is_running()
                );
            }
            Err(err) => {
                warn!("Timer status unavailable on first load, using stored record: {err}");
                if let Some(record) = stored {
                    if record.running {
                        self.inner.counter.start(record.runned_date_time);
                    }
                    shared.timer.record = record;
                }
            }
        }

        Ok(shared.timer.snapshot.clone())
    }

    pub async fn start(&self, explicit_task_id: Option<String>) -> Result<ServerTimerSnapshot> {
        let (request, task_id) = {
            let mut shared = self.lock().await;
            if shared.timer.verifying {
                return Err(TimerError::VerificationPending);
            }
            if shared.context.team_id.is_none() {
                return Err(TimerError::InvalidContext(ContextIssue::NoTeam));
            }
            let task_id = explicit_task_id
                .or_else(|| shared.context.active_task_id().map(str::to_string))
                .ok_or(TimerError::InvalidContext(ContextIssue::NoActiveTask))?;
            if let Some(task) = &shared.context.active_task {
                if task.id == task_id && !task.is_runnable() {
                    return Err(TimerError::InvalidContext(ContextIssue::TaskClosed));
                }
            }
            if !shared.context.can_track() {
                return Err(TimerError::InvalidContext(ContextIssue::PlanRequired));
            }

            shared.timer.verifying = true;
            (
                timer_request(&shared.context, Some(task_id.clone()), self.source()),
                task_id,
            )
        };

        let verified = self.inner.collaborators.timer.get_status(&request).await;

        {
            let mut shared = self.lock().await;
            shared.timer.verifying = false;

            let current = checked(verified.map_err(TimerError::Network)?)?;
            if current.running {
                if let Some(owner) = current.source().filter(|s| s.is_foreign_to(self.source())) {
                    warn!("Refusing to start: {owner} is already tracking");
                    self.apply_snapshot(&mut shared, current).await?;
                    return Err(TimerError::Verification { owner });
                }
            }

            let key = timer_record_key(shared.context.team_id.as_deref());
            let record = PersistedTimerRecord::started(self.now_ms(), Some(task_id.clone()));
            self.write_record(&mut shared, &key, record).await?;
            self.inner.counter.start(shared.timer.record.runned_date_time);
        }

        let started = self
            .inner
            .collaborators
            .timer
            .start(&request)
            .await
            .map_err(TimerError::Network)
            .and_then(checked);

        let snapshot = match started {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Timer start failed for task {task_id}: {err}");
                let mut shared = self.lock().await;
                let record = &shared.timer.record;
                if record.running && record.last_task_id.as_deref() == Some(task_id.as_str()) {
                    self.inner.counter.stop();
                    let key = timer_record_key(shared.context.team_id.as_deref());
                    let rollback = PersistedTimerRecord::stopped(Some(task_id.clone()));
                    if let Err(write_err) = self.write_record(&mut shared, &key, rollback).await {
                        error!("Failed to roll back timer record for task {task_id}: {write_err}");
                        shared.timer.record.running = false;
                        shared.timer.record.runned_date_time = 0;
                    }
                }
                self.invalidate(&[CacheScope::Timer]);
                return Err(err);
            }
        };

        let (context, assigning) = {
            let mut shared = self.lock().await;
            // stops from the previous session must not debounce this one
            shared.guard.reset();
            self.apply_snapshot(&mut shared, snapshot.clone()).await?;
            (shared.context.clone(), shared.timer.assigning_task)
        };
        self.invalidate(&[CacheScope::Timer, CacheScope::TeamMembers]);
        info!("Timer started for task {task_id}");

        if !assigning {
            if let Some(membership_id) = &context.membership_id {
                let update = ActiveTaskUpdate {
                    organization_id: context.organization_id.clone(),
                    active_task_id: Some(task_id.clone()),
                    organization_team_id: context.team_id.clone(),
                    tenant_id: context.tenant_id.clone(),
                };
                if let Err(err) = self
                    .inner
                    .collaborators
                    .membership
                    .set_active_task(membership_id, update)
                    .await
                {
                    warn!("Failed to record active task {task_id}: {err:#}");
                }
            }
        }

        let needs_status_flip = context
            .active_task
            .as_ref()
            .map(|task| task.id == task_id && task.status != TaskStatus::InProgress)
            .unwrap_or(false);
        if needs_status_flip {
            let patch = TaskPatch {
                id: task_id.clone(),
                status: TaskStatus::InProgress,
            };
            match self.inner.collaborators.tasks.update_task(patch).await {
                Ok(()) => {
                    let mut shared = self.lock().await;
                    if let Some(task) = shared.context.active_task.as_mut() {
                        if task.id == task_id {
                            task.status = TaskStatus::InProgress;
                        }
                    }
                }
                Err(err) => warn!("Failed to mark task {task_id} in progress: {err:#}"),
            }
        }

        Ok(snapshot)
    }

    pub async fn stop(&self) -> Result<StopOutcome> {
        let now = self.now_ms();
        let target = {
            let mut shared = self.lock().await;
            if !shared.timer.has_live_session() {
                return Ok(StopOutcome::AlreadyStopped);
            }
            if !shared
                .guard
                .should_accept(now, self.inner.settings.stop_debounce_ms)
            {
                debug!("{}", TimerError::RaceDebounced);
                return Ok(StopOutcome::Debounced);
            }
            self.stop_target(&shared)
        };

        self.perform_stop(target).await.map(StopOutcome::Stopped)
    }

    /// Stop without consulting the guard; callers have already done so.
    async fn perform_stop(&self, target: StopTarget) -> Result<ServerTimerSnapshot> {
        let source = {
            let mut shared = self.lock().await;
            let source = shared
                .timer
                .snapshot
                .as_ref()
                .and_then(ServerTimerSnapshot::source)
                .unwrap_or(self.source());
            let last_task_id = shared.timer.record.last_task_id.clone();
            self.write_record(&mut shared, &target.key, PersistedTimerRecord::stopped(last_task_id))
                .await?;
            self.inner.counter.stop();
            source
        };

        // flush the last partial interval before the log closes
        {
            let gateway = self.inner.collaborators.timer.clone();
            let mut request = target.request.clone();
            request.source = source;
            let retries = self.inner.settings.sync_max_retries;
            let backoff = self.inner.settings.sync_backoff();
            tokio::spawn(async move {
                sync_with_retry(gateway.as_ref(), &request, retries, backoff).await;
            });
        }

        let stopped = self
            .inner
            .collaborators
            .timer
            .stop(source, &target.request)
            .await
            .map_err(TimerError::Network)
            .and_then(checked);

        let snapshot = match stopped {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Timer stop failed: {err}");
                return Err(err);
            }
        };

        {
            let mut shared = self.lock().await;
            if target.key == timer_record_key(shared.context.team_id.as_deref()) {
                self.apply_snapshot(&mut shared, snapshot.clone()).await?;
            }
        }
        self.invalidate(&[CacheScope::Timer, CacheScope::TeamMembers]);
        info!("Timer stopped ({source})");

        if let Some(membership_id) = &target.context.membership_id {
            let update = ActiveTaskUpdate {
                organization_id: target.context.organization_id.clone(),
                active_task_id: None,
                organization_team_id: target.context.team_id.clone(),
                tenant_id: target.context.tenant_id.clone(),
            };
            if let Err(err) = self
                .inner
                .collaborators
                .membership
                .set_active_task(membership_id, update)
                .await
            {
                warn!("Failed to clear active task after stop: {err:#}");
            }
        }

        Ok(snapshot)
    }

    /// Start `task_id` when idle, stop otherwise.
    pub async fn toggle(&self, task_id: &str) -> Result<Option<ServerTimerSnapshot>> {
        let live = self.lock().await.timer.has_live_session();
        if live {
            match self.stop().await? {
                StopOutcome::Stopped(snapshot) => Ok(Some(snapshot)),
                StopOutcome::AlreadyStopped | StopOutcome::Debounced => Ok(None),
            }
        } else {
            self.start(Some(task_id.to_string())).await.map(Some)
        }
    }

    /// Fetch the server status and merge it when it materially changed.
    pub async fn get_status(&self, deep_check: bool) -> Result<Option<ServerTimerSnapshot>> {
        let request = {
            let mut shared = self.lock().await;
            shared.timer.status_fetching = true;
            timer_request(&shared.context, None, self.source())
        };

        let fetched = self.inner.collaborators.timer.get_status(&request).await;

        let mut shared = self.lock().await;
        shared.timer.status_fetching = false;
        let snapshot = checked(fetched.map_err(TimerError::Network)?)?;

        if request.organization_team_id != shared.context.team_id {
            debug!("Dropping timer status fetched for a previous team");
            return Ok(shared.timer.snapshot.clone());
        }

        let changed = match &shared.timer.snapshot {
            Some(current) => current.differs_from(&snapshot, deep_check),
            None => true,
        };
        if changed {
            self.apply_snapshot(&mut shared, snapshot).await?;
        }
        Ok(shared.timer.snapshot.clone())
    }

    pub async fn set_team(&self, selection: TeamSelection) -> Result<()> {
        let now = self.now_ms();
        let (transition, target) = {
            let mut shared = self.lock().await;
            let ownership = shared.timer.ownership(self.source());
            let target = self.stop_target(&shared);
            let Shared {
                transitions, guard, ..
            } = &mut *shared;
            let transition =
                transitions.on_team_change(selection.team_id.as_deref(), ownership, guard, now);
            (transition, target)
        };

        let Some(transition) = transition else {
            let mut shared = self.lock().await;
            shared.context.membership_id = selection.membership_id;
            return Ok(());
        };
        info!(
            "Team changed {:?} -> {:?}",
            transition.previous_team_id, transition.new_team_id
        );

        if transition.stop {
            if let Err(err) = self.perform_stop(target.clone()).await {
                error!("Failed to stop timer while leaving team: {err}");
            }
        }

        let previous = target.context;
        if let Some(membership_id) = previous.membership_id.clone() {
            let last_task_id = {
                let shared = self.lock().await;
                previous
                    .active_task_id()
                    .map(str::to_string)
                    .or_else(|| shared.timer.record.last_task_id.clone())
            };
            let update = ActiveTaskUpdate {
                organization_id: previous.organization_id.clone(),
                active_task_id: last_task_id,
                organization_team_id: previous.team_id.clone(),
                tenant_id: previous.tenant_id.clone(),
            };
            let membership = self.inner.collaborators.membership.clone();
            tokio::spawn(async move {
                if let Err(err) = membership.set_active_task(&membership_id, update).await {
                    warn!("Failed to keep active task for previous team: {err:#}");
                }
            });
        }

        {
            let mut shared = self.lock().await;
            shared.context.team_id = selection.team_id.clone();
            shared.context.membership_id = selection.membership_id;
            shared.context.active_task = selection.active_task;
            let task_id = shared.context.active_task_id().map(str::to_string);
            shared
                .transitions
                .seed(selection.team_id.as_deref(), task_id.as_deref());

            shared.timer.reset_snapshot();
            self.inner.counter.stop();
            self.inner.scheduler.stop();

            let key = timer_record_key(selection.team_id.as_deref());
            let stored = self
                .inner
                .collaborators
                .persistence
                .get(&key)
                .await
                .map_err(TimerError::Persistence)?
                .filter(|record| record.validate().is_ok())
                .unwrap_or_default();
            if stored.running {
                self.inner.counter.start(stored.runned_date_time);
            }
            shared.timer.record = stored;
        }
        self.invalidate(&[CacheScope::Timer]);

        if let Err(err) = self.get_status(false).await {
            warn!("Failed to refresh timer status for new team: {err}");
        }
        Ok(())
    }

    pub async fn set_active_task(&self, task: Option<ActiveTask>) -> Result<()> {
        let now = self.now_ms();
        let (transition, target) = {
            let mut shared = self.lock().await;
            let ownership = shared.timer.ownership(self.source());
            let assigning = shared.timer.assigning_task;
            let target = self.stop_target(&shared);
            let task_id = task.as_ref().map(|task| task.id.clone());
            let Shared {
                transitions, guard, ..
            } = &mut *shared;
            let transition =
                transitions.on_task_change(task_id.as_deref(), ownership, assigning, guard, now);
            shared.context.active_task = task;
            (transition, target)
        };

        if let Some(transition) = transition {
            debug!(
                "Active task changed {:?} -> {:?}",
                transition.previous_task_id, transition.new_task_id
            );
            if transition.stop {
                if let Err(err) = self.perform_stop(target).await {
                    error!("Failed to stop timer after task switch: {err}");
                }
            }
        }
        Ok(())
    }

    /// Make `task` the active task and start tracking it.
    ///
    /// The task switch does not stop the running session and `start` does not
    /// write the active task a second time.
    pub async fn assign_task_and_start(&self, task: ActiveTask) -> Result<ServerTimerSnapshot> {
        self.lock().await.timer.assigning_task = true;
        let result = self.assign_and_start(task).await;
        self.lock().await.timer.assigning_task = false;
        result
    }

    async fn assign_and_start(&self, task: ActiveTask) -> Result<ServerTimerSnapshot> {
        let task_id = task.id.clone();
        self.set_active_task(Some(task)).await?;

        let context = self.context().await;
        if let Some(membership_id) = &context.membership_id {
            let update = ActiveTaskUpdate {
                organization_id: context.organization_id.clone(),
                active_task_id: Some(task_id.clone()),
                organization_team_id: context.team_id.clone(),
                tenant_id: context.tenant_id.clone(),
            };
            self.inner
                .collaborators
                .membership
                .set_active_task(membership_id, update)
                .await
                .map_err(TimerError::Network)?;
        }

        self.start(Some(task_id)).await
    }

    pub async fn set_plan_policy(&self, require_plan_to_track: bool, has_plan_with_tasks: bool) {
        let mut shared = self.lock().await;
        shared.context.require_plan_to_track = require_plan_to_track;
        shared.context.has_plan_with_tasks = has_plan_with_tasks;
    }

    pub async fn snapshot(&self) -> Option<ServerTimerSnapshot> {
        self.lock().await.timer.snapshot.clone()
    }

    pub async fn record(&self) -> PersistedTimerRecord {
        self.lock().await.timer.record.clone()
    }

    pub async fn context(&self) -> TimerContext {
        self.lock().await.context.clone()
    }

    pub async fn ownership(&self) -> SessionOwnership {
        self.lock().await.timer.ownership(self.source())
    }

    pub async fn is_running(&self) -> bool {
        self.lock().await.timer.is_running()
    }

    pub async fn is_status_fetching(&self) -> bool {
        self.lock().await.timer.status_fetching
    }

    pub async fn is_first_load_done(&self) -> bool {
        self.lock().await.timer.first_load_done
    }

    pub async fn can_track(&self) -> bool {
        self.lock().await.context.can_track()
    }

    /// Whether the play/stop control should be enabled.
    pub async fn can_run_timer(&self) -> bool {
        let shared = self.lock().await;
        let task_ready = shared.context.team_id.is_some()
            && shared
                .context
                .active_task
                .as_ref()
                .map(ActiveTask::is_runnable)
                .unwrap_or(false)
            && shared.context.can_track();
        task_ready
            || shared.timer.ownership(self.source()) == SessionOwnership::RunningLocalSource
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.inner.counter.elapsed_ms()
    }

    pub fn formatted_counter(&self) -> FormattedCounter {
        self.inner.counter.formatted()
    }

    pub fn subscribe_elapsed(&self) -> watch::Receiver<i64> {
        self.inner.counter.subscribe()
    }

    pub fn is_counting(&self) -> bool {
        self.inner.counter.is_running()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.scheduler.is_active()
    }
}
