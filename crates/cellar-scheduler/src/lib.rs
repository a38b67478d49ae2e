//! # Cellar Scheduler
//!
//! Reacts to tree, metadata and timer events by running the action trees of
//! matching jobs, one bounded worker pool per job.
//!
//! ## Architecture
//! ```text
//! Broker ─► Multiplexer ─► main queue ─► router ─► Dispatcher[job] ─► worker
//!                                ▲                                      │
//!                                └──── chained runnables ◄── Runnable::run
//!                                                                       │
//!               JobService.put_task_stream ◄── writer ◄── TaskHandle ◄──┘
//! ```

pub mod actions;
pub mod dispatcher;
pub mod multiplexer;
pub mod runnable;
pub mod task;
pub mod writer;

pub use actions::{ActionEnv, ActionRegistry, ConcreteAction, RunContext};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use multiplexer::{Multiplexer, SchedulerHandle, start};
pub use runnable::{Runnable, Runtime};
pub use task::TaskHandle;
