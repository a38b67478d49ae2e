//! Task-state writer: the single sink persisting task snapshots through the
//! job service's streaming `put_task`, in the order they were produced.

use cellar_jobs::{JobService, Task};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

/// Forward every update from `updates` until all task handles are gone.
pub fn spawn(
    jobs: Arc<JobService>,
    mut updates: mpsc::UnboundedReceiver<Task>,
    buffer: usize,
) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel::<Task>(buffer.max(1));
    let mut answers = jobs.put_task_stream(ReceiverStream::new(rx));

    let drain = tokio::spawn(async move {
        while let Some(answer) = answers.next().await {
            if let Err(e) = answer {
                tracing::error!("❌ Task update not persisted: {e}");
            }
        }
    });

    tokio::spawn(async move {
        while let Some(task) = updates.recv().await {
            if tx.send(task).await.is_err() {
                tracing::error!("❌ Task update stream closed");
                break;
            }
        }
        drop(tx);
        let _ = drain.await;
        tracing::debug!("task writer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_jobs::{Broker, Job, JobStore, TaskStatus};

    #[tokio::test]
    async fn test_updates_persisted_in_order() {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let jobs = Arc::new(JobService::new(store.clone(), Arc::new(Broker::new(16))));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn(jobs, rx, 2);

        let mut task = Task::for_job(&Job::new("j", ""));
        for status in [TaskStatus::Idle, TaskStatus::Running, TaskStatus::Finished] {
            task.status = status;
            tx.send(task.clone()).unwrap();
        }
        drop(tx);
        writer.await.unwrap();

        let stored = store.list_tasks("j", TaskStatus::Any).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, TaskStatus::Finished);
    }
}
