pub mod context;
pub mod record;
pub mod snapshot;
pub mod source;

pub use context::{ActiveTask, TaskStatus, TimerContext};
pub use record::PersistedTimerRecord;
pub use snapshot::{LastLog, ServerTimerSnapshot};
pub use source::Source;
