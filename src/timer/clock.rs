use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

// Set to true to enable tick-level logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// Wall clock in epoch milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Elapsed time split for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedCounter {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub hundredths: i64,
}

impl FormattedCounter {
    pub fn from_millis(elapsed_ms: i64) -> Self {
        let elapsed_ms = elapsed_ms.max(0);
        let total_seconds = elapsed_ms / 1_000;
        Self {
            hours: total_seconds / 3_600,
            minutes: (total_seconds % 3_600) / 60,
            seconds: total_seconds % 60,
            hundredths: (elapsed_ms % 1_000) / 10,
        }
    }
}

impl fmt::Display for FormattedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )
    }
}

/// Server start times can be ahead of the local clock; never show negative time.
fn elapsed_since(now_ms: i64, runned_date_time: i64) -> i64 {
    let elapsed = now_ms - runned_date_time;
    if elapsed < 0 {
        log_debug!("counter anchor {runned_date_time} is {}ms in the future", -elapsed);
    }
    elapsed.max(0)
}

/// Free-running millisecond counter published through a watch channel.
pub struct TimeCounterClock {
    clock: Arc<dyn Clock>,
    resolution: Duration,
    elapsed: Arc<watch::Sender<i64>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TimeCounterClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeCounterClock")
            .field("resolution", &self.resolution)
            .field("elapsed_ms", &self.elapsed_ms())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TimeCounterClock {
    pub fn new(clock: Arc<dyn Clock>, resolution: Duration) -> Self {
        let (elapsed, _) = watch::channel(0);
        Self {
            clock,
            resolution,
            elapsed: Arc::new(elapsed),
            ticker: Mutex::new(None),
        }
    }

    /// Arm the counter from `runned_date_time`. Replaces any running ticker.
    pub fn start(&self, runned_date_time: i64) {
        let mut ticker = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        self.elapsed
            .send_replace(elapsed_since(self.clock.now_ms(), runned_date_time));

        let clock = self.clock.clone();
        let elapsed = self.elapsed.clone();
        let resolution = self.resolution;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(resolution);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                elapsed.send_replace(elapsed_since(clock.now_ms(), runned_date_time));
            }
        });

        *ticker = Some(handle);
    }

    pub fn stop(&self) {
        let mut ticker = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        self.elapsed.send_replace(0);
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn elapsed_ms(&self) -> i64 {
        *self.elapsed.borrow()
    }

    pub fn formatted(&self) -> FormattedCounter {
        FormattedCounter::from_millis(self.elapsed_ms())
    }

    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.elapsed.subscribe()
    }
}

impl Drop for TimeCounterClock {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}
