mod config;
mod debounce;
mod operations;
mod remote;
mod scheduler;
mod session;
mod settings;
mod task;
mod ui;
mod user_queue;

#[cfg(test)]
mod test_support;

pub use config::SchedulerConfig;
pub use debounce::{DebounceError, Debouncer};
pub use operations::{Operation, OperationContext, TaskError, TaskSink};
pub use remote::RemoteDrive;
pub use scheduler::{Scheduler, SchedulerError};
pub use session::{Session, SessionEvent, UserId};
pub use settings::{ConflictBehavior, Settings, SettingsStore};
pub use task::{
    ExtraParams, Task, TaskEvent, TaskId, TaskIdGenerator, TaskSnapshot, TaskStatus,
    TransitionError,
};
pub use ui::{InlineDispatcher, SerialDispatcher, UiAction, UiClosed, UiDispatcher, run_on_ui};
pub use user_queue::{QueueCounts, QueueError, UserQueue};
