//! Live task state shared by every runnable of one task.
//!
//! Status and the in-flight reference count sit under the same lock, so a
//! snapshot never shows `Finished` while actions are still pending. Every
//! snapshot handed to the writer is taken under that lock.

use cellar_jobs::model::now_unix;
use cellar_jobs::{ActionLog, Job, Task, TaskStatus};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub struct TaskHandle {
    id: String,
    job: Arc<Job>,
    state: Mutex<Task>,
    updates: mpsc::UnboundedSender<Task>,
}

impl TaskHandle {
    /// A new idle task of `job`. The job value is captured for the whole run.
    pub fn new(job: Arc<Job>, updates: mpsc::UnboundedSender<Task>) -> Arc<Self> {
        let task = Task::for_job(&job);
        Arc::new(Self {
            id: task.id.clone(),
            job,
            state: Mutex::new(task),
            updates,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    fn lock(&self) -> MutexGuard<'_, Task> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Task {
        self.lock().clone()
    }

    fn persist(&self, task: &Task) {
        if self.updates.send(task.clone()).is_err() {
            tracing::debug!("task writer gone, update of {} dropped", self.id);
        }
    }

    /// Persist the current state.
    pub fn flush(&self) {
        let task = self.lock();
        self.persist(&task);
    }

    /// One more action in flight.
    pub fn add_ref(&self) {
        self.lock().rc += 1;
    }

    /// Move to `status`. `Error` and `Interrupted` are final; `Finished`
    /// while actions are pending becomes `Running`.
    pub fn set_status(&self, status: TaskStatus, message: &str) {
        let mut task = self.lock();
        Self::transition(&mut task, status, message);
        self.persist(&task);
    }

    fn transition(task: &mut Task, status: TaskStatus, message: &str) {
        if matches!(task.status, TaskStatus::Error | TaskStatus::Interrupted) {
            return;
        }
        let status = if status == TaskStatus::Finished && task.rc > 0 {
            TaskStatus::Running
        } else {
            status
        };
        task.status = status;
        if !message.is_empty() {
            task.status_message = message.to_string();
        }
        match status {
            TaskStatus::Running if task.start_time == 0 => task.start_time = now_unix(),
            TaskStatus::Finished | TaskStatus::Error | TaskStatus::Interrupted => {
                task.end_time = now_unix();
                if task.start_time == 0 {
                    task.start_time = task.end_time;
                }
            }
            _ => {}
        }
    }

    pub fn set_running(&self) {
        self.set_status(TaskStatus::Running, "");
    }

    pub fn fail(&self, message: &str) {
        tracing::warn!("❌ Task {} of job {} failed: {message}", self.id, self.job.id);
        self.set_status(TaskStatus::Error, message);
    }

    pub fn interrupt(&self, message: &str) {
        self.set_status(TaskStatus::Interrupted, message);
    }

    pub fn append_log(&self, log: ActionLog) {
        self.lock().action_logs.push(log);
    }

    /// Clamp to `0..=1`; persisted when the job reports progress.
    pub fn set_progress(&self, progress: f32) {
        let mut task = self.lock();
        task.progress = progress.clamp(0.0, 1.0);
        if task.has_progress {
            self.persist(&task);
        }
    }

    /// One action done. The last one finishes the task.
    pub fn release(&self) {
        let mut task = self.lock();
        task.rc = (task.rc - 1).max(0);
        if task.rc == 0 {
            if task.has_progress && task.status != TaskStatus::Error {
                task.progress = 1.0;
            }
            Self::transition(&mut task, TaskStatus::Finished, "");
            tracing::debug!("✅ Task {} of job {} ended: {}", self.id, self.job.id, task.status);
        }
        self.persist(&task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (Arc<TaskHandle>, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut job = Job::new("j", "Job");
        job.has_progress = true;
        (TaskHandle::new(Arc::new(job), tx), rx)
    }

    #[test]
    fn test_finished_only_at_zero_refs() {
        let (task, mut rx) = handle();
        task.add_ref();
        task.add_ref();
        task.set_running();
        task.set_status(TaskStatus::Finished, "");
        assert_eq!(task.snapshot().status, TaskStatus::Running);

        task.release();
        assert_eq!(task.snapshot().status, TaskStatus::Running);
        task.release();
        let done = task.snapshot();
        assert_eq!(done.status, TaskStatus::Finished);
        assert_eq!(done.rc, 0);
        assert!(done.end_time >= done.start_time);

        while let Ok(update) = rx.try_recv() {
            assert!(update.status != TaskStatus::Finished || update.rc == 0);
        }
    }

    #[test]
    fn test_error_is_final() {
        let (task, _rx) = handle();
        task.add_ref();
        task.add_ref();
        task.fail("boom");
        task.set_running();
        task.release();
        task.release();
        let t = task.snapshot();
        assert_eq!(t.status, TaskStatus::Error);
        assert_eq!(t.status_message, "boom");
    }

    #[test]
    fn test_progress_clamped_and_completed() {
        let (task, mut rx) = handle();
        task.add_ref();
        task.set_progress(1.7);
        assert_eq!(rx.try_recv().unwrap().progress, 1.0);
        task.set_progress(-1.0);
        assert_eq!(task.snapshot().progress, 0.0);
        task.release();
        assert_eq!(task.snapshot().progress, 1.0);
    }

    #[test]
    fn test_interrupted_not_overwritten_by_release() {
        let (task, _rx) = handle();
        task.add_ref();
        task.interrupt("job removed");
        task.release();
        assert_eq!(task.snapshot().status, TaskStatus::Interrupted);
    }
}
