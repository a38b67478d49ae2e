//! # Cellar Jobs
//!
//! The job catalog: declarative job definitions, the messages that flow
//! through their action trees, the matching language used by selectors and
//! filters, and the persistent store behind the job service.
//!
//! ## Architecture
//! ```text
//! JobService (put/get/delete/list jobs, put/list/delete tasks)
//!   ├── JobStore (SQLite)
//!   │     ├── jobs   : JobID → Job (tasks stripped)
//!   │     └── tasks  : (JobID, TaskID) → Task
//!   └── Broker
//!         ├── job.config.events  ← JobChange on put/delete
//!         ├── job.task.events    ← TaskChange on put/delete task
//!         └── timer.events       ← JobTrigger for AutoStart jobs
//!
//! Action tree
//!   Action ── filters (nodes, users, source) ── selectors (nodes, users)
//!     └── chained_actions: [Action, ...]
//! ```

pub mod events;
pub mod filters;
pub mod message;
pub mod model;
pub mod query;
pub mod selectors;
pub mod service;
pub mod store;

pub use events::{Broker, JobChangeEvent, TaskChangeEvent};
pub use filters::{Filter, NodesFilter, SourceFilter, UsersFilter};
pub use message::{ActionMessage, ActionOutput, TriggerEvent};
pub use model::{Action, ActionLog, Job, Task, TaskStatus};
pub use query::{Clause, NodeMatch, Operation, Query, SourceMatch, SubQuery, UserMatch};
pub use selectors::{NodesSelector, Selection, Selector, UsersSelector};
pub use service::JobService;
pub use store::{DeleteTasksRequest, JobStore, ListJobsRequest};
