//! Job service: async facade over the [`JobStore`] that publishes change
//! events on the [`Broker`].

use cellar_core::{CellarError, JobTriggerEvent, Result};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::events::{Broker, JobChangeEvent, TaskChangeEvent};
use crate::model::{Job, Task, TaskStatus};
use crate::store::{DeleteTasksRequest, JobStore, ListJobsRequest};

const STREAM_BUFFER: usize = 64;

pub struct JobService {
    store: Arc<JobStore>,
    broker: Arc<Broker>,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, broker: Arc<Broker>) -> Self {
        Self { store, broker }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&JobStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| CellarError::internal(format!("store worker: {e}")))?
    }

    /// Upsert a job, announce it, and trigger it once if it auto-starts.
    pub async fn put_job(&self, job: Job) -> Result<Job> {
        let job = job.without_tasks();
        let stored = job.clone();
        self.blocking(move |s| s.put_job(&stored)).await?;
        tracing::info!("📋 Job saved: '{}' ({})", job.label, job.id);

        self.broker.job_config.publish(JobChangeEvent::updated(job.clone()));
        if job.auto_start {
            tracing::info!("▶️ Auto-starting job {}", job.id);
            self.broker.timer_events.publish(JobTriggerEvent::run_now(&job.id));
        }
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str, load_tasks: TaskStatus) -> Result<Job> {
        let id = job_id.to_string();
        self.blocking(move |s| s.get_job(&id, load_tasks)).await
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let id = job_id.to_string();
        self.blocking(move |s| s.delete_job(&id)).await?;
        tracing::info!("🗑️ Job removed: {job_id}");
        self.broker.job_config.publish(JobChangeEvent::removed(job_id));
        Ok(())
    }

    pub async fn list_jobs(&self, req: ListJobsRequest) -> Result<ReceiverStream<Job>> {
        let jobs = self.blocking(move |s| s.list_jobs(&req)).await?;
        Ok(stream_of(jobs))
    }

    pub async fn put_task(&self, task: Task) -> Result<Task> {
        let stored = task.clone();
        self.blocking(move |s| s.put_task(&stored)).await?;
        self.broker.task_events.publish(TaskChangeEvent::updated(task.clone()));
        Ok(task)
    }

    /// Persist every task of `input` in order, answering each one on the
    /// returned stream. The stream ends after the input does.
    pub fn put_task_stream<S>(self: &Arc<Self>, input: S) -> ReceiverStream<Result<Task>>
    where
        S: Stream<Item = Task> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = self.clone();
        tokio::spawn(async move {
            let mut input = Box::pin(input);
            while let Some(task) = input.next().await {
                let answer = service.put_task(task).await;
                if tx.send(answer).await.is_err() {
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Tasks of `job_id` (every job when empty) in state `status`.
    pub async fn list_tasks(&self, job_id: &str, status: TaskStatus) -> Result<ReceiverStream<Task>> {
        let id = job_id.to_string();
        let tasks = self.blocking(move |s| s.list_tasks(&id, status)).await?;
        Ok(stream_of(tasks))
    }

    /// Returns the identifiers of the deleted tasks.
    pub async fn delete_tasks(&self, req: DeleteTasksRequest) -> Result<Vec<String>> {
        let deleted = self.blocking(move |s| s.delete_tasks(&req)).await?;
        for task in &deleted {
            self.broker.task_events.publish(TaskChangeEvent::removed(&task.id));
        }
        if !deleted.is_empty() {
            tracing::info!("🧹 Deleted {} tasks", deleted.len());
        }
        Ok(deleted.into_iter().map(|t| t.id).collect())
    }
}

fn stream_of<T: Send + 'static>(items: Vec<T>) -> ReceiverStream<T> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}
