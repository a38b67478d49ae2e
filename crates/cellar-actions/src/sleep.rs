//! `actions.scheduler.sleep`: wait `duration_ms`, then pass the input on.

use async_trait::async_trait;
use cellar_core::Result;
use cellar_jobs::{Action, ActionMessage, ActionOutput, Job};
use cellar_scheduler::{ActionEnv, ConcreteAction, RunContext};
use std::time::Duration;

pub const ID: &str = "actions.scheduler.sleep";

const DEFAULT_DURATION_MS: u64 = 1000;

#[derive(Default)]
pub struct SleepAction {
    duration: Duration,
}

#[async_trait]
impl ConcreteAction for SleepAction {
    fn name(&self) -> &str {
        ID
    }

    fn init(&mut self, _env: &ActionEnv, _job: &Job, action: &Action) -> Result<()> {
        self.duration = Duration::from_millis(crate::number(action, "duration_ms", DEFAULT_DURATION_MS)?);
        Ok(())
    }

    async fn run(&self, ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage> {
        let allowed = ctx.bounded(self.duration);
        tokio::time::sleep(allowed).await;
        if allowed < self.duration {
            return Ok(input
                .clone()
                .with_error(&format!("deadline reached after {}ms", allowed.as_millis())));
        }
        ctx.set_progress(1.0);
        Ok(input
            .clone()
            .with_output(ActionOutput::success().with_string(format!("slept {}ms", self.duration.as_millis()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, env};
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_waits() {
        let env = env();
        let job = Job::new("nap", "Nap");
        let mut sleep = SleepAction::default();
        sleep
            .init(&env, &job, &Action::new(ID).with_param("duration_ms", "50"))
            .unwrap();
        let ctx = context(&env, job, None);
        let started = Instant::now();
        let out = sleep.run(&ctx, &ActionMessage::default()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(out.last_output().unwrap().success);
    }

    #[tokio::test]
    async fn test_sleep_cut_by_deadline() {
        let env = env();
        let job = Job::new("nap", "Nap");
        let mut sleep = SleepAction::default();
        sleep
            .init(&env, &job, &Action::new(ID).with_param("duration_ms", "5000"))
            .unwrap();
        let ctx = context(&env, job, Some(Instant::now() + Duration::from_millis(50)));
        let out = sleep.run(&ctx, &ActionMessage::default()).await.unwrap();
        let last = out.last_output().unwrap();
        assert!(!last.success);
        assert!(last.error_string.contains("deadline"));
    }
}
