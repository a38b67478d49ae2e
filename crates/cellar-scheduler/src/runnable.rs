//! Runnables and the task runner.
//!
//! A runnable is one action of one task applied to one input message.
//! Running it resolves the concrete action, executes it, records the log,
//! then expands every chained action over the output and queues the
//! resulting runnables on the main queue. Each queued runnable holds one
//! reference on its task; the reference is released when it completes.

use cellar_jobs::{Action, ActionLog, ActionMessage};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::actions::{ActionEnv, ActionRegistry, RunContext};
use crate::task::TaskHandle;

/// Everything a runnable needs besides its own fields.
pub struct Runtime {
    pub registry: Arc<ActionRegistry>,
    pub env: ActionEnv,
    pub main_queue: mpsc::UnboundedSender<Runnable>,
    /// Capacity of selector channels.
    pub selection_buffer: usize,
    /// Per-action deadline, when set.
    pub action_timeout: Option<Duration>,
}

pub struct Runnable {
    pub action: Action,
    pub task: Arc<TaskHandle>,
    pub input: ActionMessage,
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("action", &self.action.id)
            .field("task", &self.task.id())
            .field("nodes", &self.input.nodes.len())
            .finish()
    }
}

impl Runnable {
    pub fn new(action: Action, task: Arc<TaskHandle>, input: ActionMessage) -> Self {
        Self {
            action,
            task,
            input,
        }
    }

    pub fn job_id(&self) -> &str {
        self.task.job_id()
    }

    /// Execute, queue the children, release this runnable's reference.
    pub async fn run(self, rt: &Runtime) {
        self.execute(rt).await;
        self.task.release();
    }

    async fn execute(&self, rt: &Runtime) {
        let task = &self.task;
        let mut concrete = match rt.registry.create(&self.action.id) {
            Ok(concrete) => concrete,
            Err(e) => {
                self.record_failure(&e.to_string());
                return;
            }
        };
        if let Err(e) = concrete.init(&rt.env, task.job(), &self.action) {
            self.record_failure(&format!("init {}: {e}", self.action.id));
            return;
        }

        task.set_running();
        let ctx = RunContext::new(
            task.clone(),
            rt.env.clone(),
            rt.action_timeout.map(|t| Instant::now() + t),
        );
        tracing::debug!("▶️ [{}] {} on task {}", task.job_id(), self.action.id, task.id());

        let output = match AssertUnwindSafe(concrete.run(&ctx, &self.input))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.record_failure(&e.to_string());
                return;
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                tracing::error!("💥 Action {} panicked on task {}: {reason}", self.action.id, task.id());
                self.record_failure(&format!("action {} panicked: {reason}", self.action.id));
                return;
            }
        };

        task.append_log(ActionLog {
            action: self.action.without_chain(),
            input: self.input.as_log_input(),
            output: output.as_log_output(),
        });
        if let Some(failure) = output.last_output().filter(|o| !o.success) {
            task.fail(&failure.error_string);
            return;
        }

        for chained in &self.action.chained_actions {
            let children = match chained
                .expand(&rt.env.clients, output.clone(), rt.selection_buffer)
                .await
            {
                Ok(children) => children,
                Err(e) => {
                    task.fail(&format!("select for {}: {e}", chained.id));
                    continue;
                }
            };
            if children.is_empty() {
                tracing::debug!("⏭️ [{}] {} skipped, nothing selected", task.job_id(), chained.id);
            }
            for input in children {
                task.add_ref();
                let child = Runnable::new(chained.clone(), task.clone(), input);
                if let Err(mpsc::error::SendError(child)) = rt.main_queue.send(child) {
                    tracing::warn!("⚠️ Main queue closed, dropping {}", child.action.id);
                    child.task.interrupt("scheduler stopped");
                    child.task.release();
                }
            }
        }
        task.flush();
    }

    /// Log a failing output for this action and fail the task.
    fn record_failure(&self, error: &str) {
        self.task.append_log(ActionLog {
            action: self.action.without_chain(),
            input: self.input.as_log_input(),
            output: self.input.as_log_input().with_error(error),
        });
        self.task.fail(error);
    }
}

/// Message carried by a panic payload.
pub(crate) fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
