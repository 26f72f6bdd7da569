pub mod clock;
pub mod controller;
pub mod guard;
pub mod scheduler;
pub mod state;
pub mod transition;

pub use clock::{Clock, FormattedCounter, ManualClock, SystemClock, TimeCounterClock};
pub use controller::{Collaborators, StopOutcome, TeamSelection, TimerSynchronizer};
pub use guard::StopGuard;
pub use scheduler::SyncScheduler;
pub use state::{SessionOwnership, TimerState};
pub use transition::{ContextTransitionManager, TaskTransition, TeamTransition};
