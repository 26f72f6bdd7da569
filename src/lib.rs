pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod persistence;
pub mod settings;
pub mod timer;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use log::info;

use db::Database;
use gateway::{CacheInvalidator, ServerTimerGateway, TaskGateway, TeamMembershipGateway};
use models::TimerContext;
use settings::SettingsStore;
use timer::{Collaborators, SystemClock};

pub use error::{ContextIssue, TimerError};
pub use timer::{StopOutcome, TeamSelection, TimerSynchronizer};
pub use utils::init_logging;

/// Remote collaborators supplied by the embedding app.
#[derive(Clone)]
pub struct Gateways {
    pub timer: Arc<dyn ServerTimerGateway>,
    pub membership: Arc<dyn TeamMembershipGateway>,
    pub tasks: Arc<dyn TaskGateway>,
    pub invalidator: Arc<dyn CacheInvalidator>,
}

/// Composition root: settings and timer records live under `data_dir`.
///
/// Must be called from within a tokio runtime; the caller runs
/// [`TimerSynchronizer::load`] once the first screen is up.
pub fn bootstrap(
    data_dir: &Path,
    context: TimerContext,
    gateways: Gateways,
) -> anyhow::Result<TimerSynchronizer> {
    init_logging();
    info!("teamtimer starting up...");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = settings_store.settings();

    let database = Database::new(data_dir.join("teamtimer.sqlite3"))?;

    let collaborators = Collaborators {
        timer: gateways.timer,
        membership: gateways.membership,
        tasks: gateways.tasks,
        invalidator: gateways.invalidator,
        persistence: Arc::new(database),
        clock: Arc::new(SystemClock),
    };

    info!("Timer synchronizer recording as {}", settings.source);
    Ok(TimerSynchronizer::new(settings, context, collaborators)?)
}
