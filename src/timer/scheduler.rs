use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::Rng;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    gateway::{CacheInvalidator, CacheScope, ServerTimerGateway, TimerRequest},
    settings::SyncSettings,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

struct ActiveLoops {
    request: TimerRequest,
    cancel_token: CancellationToken,
    heartbeat: JoinHandle<()>,
    poller: JoinHandle<()>,
}

impl ActiveLoops {
    fn shutdown(self) {
        self.cancel_token.cancel();
        self.heartbeat.abort();
        self.poller.abort();
    }
}

/// Heartbeat and cache polling loops that run while a session is active.
pub struct SyncScheduler {
    gateway: Arc<dyn ServerTimerGateway>,
    invalidator: Arc<dyn CacheInvalidator>,
    settings: SyncSettings,
    active: Mutex<Option<ActiveLoops>>,
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("sync_interval_ms", &self.settings.sync_interval_ms)
            .field("poll_interval_ms", &self.settings.poll_interval_ms)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SyncScheduler {
    pub fn new(
        gateway: Arc<dyn ServerTimerGateway>,
        invalidator: Arc<dyn CacheInvalidator>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            gateway,
            invalidator,
            settings,
            active: Mutex::new(None),
        }
    }

    /// Start both loops for `request`. Running loops are replaced.
    pub fn start(&self, request: TimerRequest) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(loops) = active.take() {
            loops.shutdown();
        }

        let cancel_token = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.gateway.clone(),
            request.clone(),
            self.settings.clone(),
            cancel_token.clone(),
        ));
        let poller = tokio::spawn(poll_loop(
            self.invalidator.clone(),
            self.settings.poll_interval(),
            cancel_token.clone(),
        ));

        log_info!(
            "sync scheduler started: heartbeat every {}ms, polling every {}ms",
            self.settings.sync_interval_ms,
            self.settings.poll_interval_ms
        );
        *active = Some(ActiveLoops {
            request,
            cancel_token,
            heartbeat,
            poller,
        });
    }

    /// Tear both loops down before returning.
    pub fn stop(&self) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(loops) = active.take() {
            loops.shutdown();
            log_debug!("sync scheduler stopped");
        }
    }

    /// Request the heartbeat is sending, if the loops are running.
    pub fn request(&self) -> Option<TimerRequest> {
        self.active
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|loops| loops.request.clone()))
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(loops) = active.take() {
                loops.shutdown();
            }
        }
    }
}

async fn heartbeat_loop(
    gateway: Arc<dyn ServerTimerGateway>,
    request: TimerRequest,
    settings: SyncSettings,
    cancel_token: CancellationToken,
) {
    let period = settings.sync_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sync_with_retry(
                    gateway.as_ref(),
                    &request,
                    settings.sync_max_retries,
                    settings.sync_backoff(),
                )
                .await;
            }
            _ = cancel_token.cancelled() => {
                log_debug!("heartbeat loop shutting down");
                break;
            }
        }
    }
}

async fn poll_loop(
    invalidator: Arc<dyn CacheInvalidator>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                invalidator.invalidate(CacheScope::TeamMembers);
                invalidator.invalidate(CacheScope::WorkforceStatus);
            }
            _ = cancel_token.cancelled() => {
                log_debug!("poll loop shutting down");
                break;
            }
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_cap = (base.as_millis() as u64 / 2).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
    exponential + Duration::from_millis(jitter)
}

/// Send one heartbeat, retrying with backoff. Returns whether it landed.
pub async fn sync_with_retry(
    gateway: &dyn ServerTimerGateway,
    request: &TimerRequest,
    max_retries: u32,
    backoff: Duration,
) -> bool {
    let mut attempt = 0;
    loop {
        match gateway.sync(request.source, request).await {
            Ok(()) => return true,
            Err(err) if attempt < max_retries => {
                let delay = backoff_delay(backoff, attempt);
                log_debug!(
                    "timer sync attempt {} failed: {err:#}; retrying in {}ms",
                    attempt + 1,
                    delay.as_millis()
                );
                time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                log_warn!("timer sync gave up after {} attempts: {err:#}", attempt + 1);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::{InMemoryTimerServer, RecordingInvalidator};

    fn settings() -> SyncSettings {
        SyncSettings {
            sync_interval_ms: 1_000,
            poll_interval_ms: 200,
            sync_max_retries: 2,
            sync_backoff_ms: 10,
            ..SyncSettings::default()
        }
    }

    fn scheduler() -> (Arc<InMemoryTimerServer>, Arc<RecordingInvalidator>, SyncScheduler) {
        let server = Arc::new(InMemoryTimerServer::new());
        let invalidator = Arc::new(RecordingInvalidator::new());
        let scheduler = SyncScheduler::new(server.clone(), invalidator.clone(), settings());
        (server, invalidator, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_and_polling_run_while_active() {
        let (server, invalidator, scheduler) = scheduler();
        scheduler.start(TimerRequest::default());
        assert!(scheduler.is_active());

        time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(server.sync_calls(), 2);
        assert_eq!(invalidator.count(CacheScope::TeamMembers), 10);
        assert_eq!(invalidator.count(CacheScope::WorkforceStatus), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_loops_down() {
        let (server, invalidator, scheduler) = scheduler();
        scheduler.start(TimerRequest::default());
        time::sleep(Duration::from_millis(1_100)).await;
        scheduler.stop();
        assert!(!scheduler.is_active());

        let syncs = server.sync_calls();
        let polls = invalidator.count(CacheScope::TeamMembers);
        time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(server.sync_calls(), syncs);
        assert_eq!(invalidator.count(CacheScope::TeamMembers), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_does_not_stack_loops() {
        let (server, _invalidator, scheduler) = scheduler();
        scheduler.start(TimerRequest::default());
        scheduler.start(TimerRequest::default());
        time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(server.sync_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_swaps_the_heartbeat_request() {
        let (_server, _invalidator, scheduler) = scheduler();
        let first = TimerRequest {
            task_id: Some("T1".into()),
            ..TimerRequest::default()
        };
        let second = TimerRequest {
            task_id: Some("T2".into()),
            ..TimerRequest::default()
        };
        scheduler.start(first);
        scheduler.start(second.clone());
        assert_eq!(scheduler.request(), Some(second));

        scheduler.stop();
        assert_eq!(scheduler.request(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_retries_then_gives_up() {
        let server = InMemoryTimerServer::new();
        server.fail_syncs(2);
        assert!(sync_with_retry(&server, &TimerRequest::default(), 2, Duration::from_millis(10)).await);
        assert_eq!(server.sync_calls(), 3);

        server.fail_syncs(5);
        assert!(!sync_with_retry(&server, &TimerRequest::default(), 2, Duration::from_millis(10)).await);
        assert_eq!(server.sync_calls(), 6);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let base = Duration::from_millis(100);
        let first = backoff_delay(base, 0);
        let third = backoff_delay(base, 2);
        assert!(first >= base && first <= base + Duration::from_millis(50));
        assert!(third >= Duration::from_millis(400));
    }
}
