//! Job and task change events, and the broker holding every scheduler topic.

use cellar_core::events::topics;
use cellar_core::{JobTriggerEvent, NodeChangeEvent, Topic};
use serde::{Deserialize, Serialize};

use crate::model::{Job, Task};

/// Published on `job.config.events`. Exactly one field is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobChangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_updated: Option<Job>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_removed: Option<String>,
}

impl JobChangeEvent {
    pub fn updated(job: Job) -> Self {
        Self {
            job_updated: Some(job),
            job_removed: None,
        }
    }

    pub fn removed(job_id: &str) -> Self {
        Self {
            job_updated: None,
            job_removed: Some(job_id.to_string()),
        }
    }
}

/// Published on `job.task.events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskChangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_updated: Option<Task>,
    /// Identifier of a deleted task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_removed: Option<String>,
}

impl TaskChangeEvent {
    pub fn updated(task: Task) -> Self {
        Self {
            task_updated: Some(task),
            task_removed: None,
        }
    }

    pub fn removed(task_id: &str) -> Self {
        Self {
            task_updated: None,
            task_removed: Some(task_id.to_string()),
        }
    }
}

/// The in-process message bus as seen by the scheduler.
pub struct Broker {
    pub tree_changes: Topic<NodeChangeEvent>,
    pub meta_changes: Topic<NodeChangeEvent>,
    pub timer_events: Topic<JobTriggerEvent>,
    pub job_config: Topic<JobChangeEvent>,
    pub task_events: Topic<TaskChangeEvent>,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        Self {
            tree_changes: Topic::new(topics::TREE_CHANGES, capacity),
            meta_changes: Topic::new(topics::META_CHANGES, capacity),
            timer_events: Topic::new(topics::TIMER_EVENTS, capacity),
            job_config: Topic::new(topics::JOB_CONFIG_EVENTS, capacity),
            task_events: Topic::new(topics::JOB_TASK_EVENTS, capacity),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(1024)
    }
}
