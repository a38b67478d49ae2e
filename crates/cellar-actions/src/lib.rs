//! # Cellar Actions
//!
//! Built-in concrete actions, registered under their action ids by
//! [`register_builtins`].
//!
//! | id | does |
//! |----|------|
//! | `actions.log` | logs a templated message |
//! | `actions.cmd.webhook` | sends the message to an HTTP endpoint |
//! | `actions.cmd.shell` | runs a shell command with a timeout |
//! | `actions.scheduler.prune-tasks` | deletes old tasks of a job |
//! | `actions.scheduler.sleep` | waits, honouring the deadline |

pub mod log;
pub mod prune;
pub mod shell;
pub mod sleep;
pub mod template;
pub mod webhook;

use cellar_core::{CellarError, Result};
use cellar_jobs::Action;
use cellar_scheduler::ActionRegistry;

pub use log::LogAction;
pub use prune::PruneTasksAction;
pub use shell::ShellAction;
pub use sleep::SleepAction;
pub use webhook::WebhookAction;

/// Register every built-in action.
pub fn register_builtins(registry: &mut ActionRegistry) {
    registry.register(log::ID, || Box::new(LogAction::default()));
    registry.register(webhook::ID, || Box::new(WebhookAction::default()));
    registry.register(shell::ID, || Box::new(ShellAction::default()));
    registry.register(prune::ID, || Box::new(PruneTasksAction::default()));
    registry.register(sleep::ID, || Box::new(SleepAction::default()));
    tracing::debug!("🧩 {} built-in actions registered", registry.len());
}

/// Required string parameter.
pub(crate) fn required<'a>(action: &'a Action, key: &str) -> Result<&'a str> {
    action
        .param(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CellarError::bad_request(format!("{}: missing parameter '{key}'", action.id)))
}

/// Optional numeric parameter.
pub(crate) fn number(action: &Action, key: &str, default: u64) -> Result<u64> {
    match action.param(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            CellarError::bad_request(format!("{}: '{key}' is not a number: {raw}", action.id))
        }),
    }
}
