//! `actions.log`: write a templated line to the scheduler log.

use async_trait::async_trait;
use cellar_core::{CellarError, Result};
use cellar_jobs::{Action, ActionMessage, ActionOutput, Job};
use cellar_scheduler::{ActionEnv, ConcreteAction, RunContext};

use crate::template::{Vars, render};

pub const ID: &str = "actions.log";

const DEFAULT_MESSAGE: &str = "job {{job.id}} touched {{nodes.count}} node(s), first: {{node.path}}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct LogAction {
    message: String,
    level: Level,
}

#[async_trait]
impl ConcreteAction for LogAction {
    fn name(&self) -> &str {
        ID
    }

    fn init(&mut self, _env: &ActionEnv, _job: &Job, action: &Action) -> Result<()> {
        self.message = action.param("message").unwrap_or(DEFAULT_MESSAGE).to_string();
        self.level = match action.param("level") {
            None => Level::Info,
            Some(raw) => Level::parse(raw)
                .ok_or_else(|| CellarError::bad_request(format!("{ID}: unknown level '{raw}'")))?,
        };
        Ok(())
    }

    async fn run(&self, ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage> {
        let line = render(
            &self.message,
            &Vars {
                job_id: &ctx.job().id,
                task_id: ctx.task_id(),
                input,
            },
        );
        match self.level {
            Level::Debug => tracing::debug!("📝 {line}"),
            Level::Info => tracing::info!("📝 {line}"),
            Level::Warn => tracing::warn!("📝 {line}"),
            Level::Error => tracing::error!("📝 {line}"),
        }
        Ok(input.clone().with_output(ActionOutput::success().with_string(line)))
    }
}
