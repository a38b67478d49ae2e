//! `actions.cmd.shell`: run a command through `sh -c`.
//!
//! The command line is templated. The child sees `CELLAR_JOB_ID`,
//! `CELLAR_TASK_ID`, `CELLAR_NODE_PATH` (first node) and `CELLAR_NODE_PATHS`
//! (newline separated). It is killed when the timeout or the run deadline
//! expires. A non-zero exit becomes a failure output.

use async_trait::async_trait;
use cellar_core::Result;
use cellar_jobs::{Action, ActionMessage, ActionOutput, Job};
use cellar_scheduler::{ActionEnv, ConcreteAction, RunContext};
use std::time::Duration;

use crate::template::{Vars, render};
use crate::webhook::truncate;

pub const ID: &str = "actions.cmd.shell";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_OUTPUT: usize = 5000;

#[derive(Default)]
pub struct ShellAction {
    command: String,
    workdir: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl ConcreteAction for ShellAction {
    fn name(&self) -> &str {
        ID
    }

    fn init(&mut self, _env: &ActionEnv, _job: &Job, action: &Action) -> Result<()> {
        self.command = crate::required(action, "command")?.to_string();
        self.workdir = action.param("workdir").map(str::to_string);
        self.timeout = Duration::from_secs(crate::number(action, "timeout_secs", DEFAULT_TIMEOUT_SECS)?);
        Ok(())
    }

    async fn run(&self, ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage> {
        let command = render(
            &self.command,
            &Vars {
                job_id: &ctx.job().id,
                task_id: ctx.task_id(),
                input,
            },
        );
        let paths: Vec<&str> = input.nodes.iter().map(|n| n.path.as_str()).collect();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .env("CELLAR_JOB_ID", &ctx.job().id)
            .env("CELLAR_TASK_ID", ctx.task_id())
            .env("CELLAR_NODE_PATH", paths.first().copied().unwrap_or(""))
            .env("CELLAR_NODE_PATHS", paths.join("\n"))
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let timeout = ctx.bounded(self.timeout);
        tracing::debug!("🐚 [{}] {command}", ctx.job().id);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(input.clone().with_error(&format!("spawn failed: {e}"))),
            Err(_) => {
                tracing::warn!("⏰ Command timed out after {}s: {command}", timeout.as_secs());
                return Ok(input
                    .clone()
                    .with_error(&format!("command timed out after {}s", timeout.as_secs())));
            }
        };

        let mut stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        truncate(&mut stdout, MAX_OUTPUT);
        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            truncate(&mut stderr, MAX_OUTPUT);
            return Ok(input.clone().with_error(&format!("{}: {stderr}", output.status)));
        }
        Ok(input.clone().with_output(ActionOutput::success().with_string(stdout)))
    }
}
