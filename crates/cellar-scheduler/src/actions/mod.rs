//! Concrete actions: the implementations bound to a job's action ids.

pub mod registry;

pub use registry::ActionRegistry;

use async_trait::async_trait;
use cellar_core::{Clients, Result};
use cellar_jobs::{Action, ActionMessage, Job, JobService};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::task::TaskHandle;

/// Services an action may bind to during `init`.
#[derive(Clone)]
pub struct ActionEnv {
    pub clients: Clients,
    pub jobs: Arc<JobService>,
}

/// Per-invocation context handed to [`ConcreteAction::run`].
pub struct RunContext {
    task: Arc<TaskHandle>,
    env: ActionEnv,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new(task: Arc<TaskHandle>, env: ActionEnv, deadline: Option<Instant>) -> Self {
        Self {
            task,
            env,
            deadline,
        }
    }

    pub fn job(&self) -> &Job {
        self.task.job()
    }

    pub fn task_id(&self) -> &str {
        self.task.id()
    }

    pub fn clients(&self) -> &Clients {
        &self.env.clients
    }

    pub fn jobs(&self) -> &Arc<JobService> {
        &self.env.jobs
    }

    /// Instant by which the action should return, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `wanted`, shortened to what is left before the deadline.
    pub fn bounded(&self, wanted: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => wanted.min(deadline.saturating_duration_since(Instant::now())),
            None => wanted,
        }
    }

    /// Report progress in `0..=1`. Persisted only for jobs with progress.
    pub fn set_progress(&self, progress: f32) {
        self.task.set_progress(progress);
    }
}

/// An action implementation. A fresh instance is created for every runnable.
#[async_trait]
pub trait ConcreteAction: Send + Sync {
    /// Stable identifier, e.g. `actions.cmd.webhook`.
    fn name(&self) -> &str;

    /// Bind clients and parse `action.parameters`. Called once before `run`.
    fn init(&mut self, env: &ActionEnv, job: &Job, action: &Action) -> Result<()>;

    /// Execute on `input`, returning it with one more output appended.
    /// Returning `input.with_ignore()` skips the action without failing the task.
    async fn run(&self, ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage>;
}
