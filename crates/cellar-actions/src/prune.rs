//! `actions.scheduler.prune-tasks`: keep a job's task history short.
//!
//! Parameters: `job_id` (default: the running job), `max_tasks` (default 20)
//! and `statuses`, a comma separated list of task states to prune (default
//! `finished,error,interrupted`).

use async_trait::async_trait;
use cellar_core::{CellarError, Result};
use cellar_jobs::{Action, ActionMessage, ActionOutput, DeleteTasksRequest, Job, TaskStatus};
use cellar_scheduler::{ActionEnv, ConcreteAction, RunContext};

pub const ID: &str = "actions.scheduler.prune-tasks";

const DEFAULT_MAX_TASKS: u64 = 20;
const DEFAULT_STATUSES: [TaskStatus; 3] = [TaskStatus::Finished, TaskStatus::Error, TaskStatus::Interrupted];

#[derive(Default)]
pub struct PruneTasksAction {
    job_id: Option<String>,
    max_tasks: usize,
    statuses: Vec<TaskStatus>,
}

fn parse_statuses(raw: &str) -> Result<Vec<TaskStatus>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            TaskStatus::parse(s).ok_or_else(|| CellarError::bad_request(format!("{ID}: unknown status '{s}'")))
        })
        .collect()
}

#[async_trait]
impl ConcreteAction for PruneTasksAction {
    fn name(&self) -> &str {
        ID
    }

    fn init(&mut self, _env: &ActionEnv, _job: &Job, action: &Action) -> Result<()> {
        self.job_id = action.param("job_id").filter(|s| !s.is_empty()).map(str::to_string);
        self.max_tasks = crate::number(action, "max_tasks", DEFAULT_MAX_TASKS)? as usize;
        self.statuses = match action.param("statuses") {
            Some(raw) => parse_statuses(raw)?,
            None => DEFAULT_STATUSES.to_vec(),
        };
        if self.statuses.is_empty() {
            return Err(CellarError::bad_request(format!("{ID}: no statuses to prune")));
        }
        Ok(())
    }

    async fn run(&self, ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage> {
        let job_id = self.job_id.clone().unwrap_or_else(|| ctx.job().id.clone());
        let deleted = ctx
            .jobs()
            .delete_tasks(DeleteTasksRequest {
                job_id: job_id.clone(),
                statuses: self.statuses.clone(),
                prune_limit: self.max_tasks,
                ..Default::default()
            })
            .await?;
        tracing::info!("🧹 Pruned {} task(s) of job {job_id}", deleted.len());
        let output = ActionOutput::success()
            .with_string(format!("pruned {} task(s)", deleted.len()))
            .with_json(&deleted)?;
        Ok(input.clone().with_output(output))
    }
}
