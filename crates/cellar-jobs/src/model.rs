//! Job definitions and task records: the core data model of the catalog.

use cellar_core::config::DEFAULT_MAX_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::filters::{NodesFilter, SourceFilter, UsersFilter};
use crate::message::ActionMessage;
use crate::selectors::{NodesSelector, UsersSelector};

/// A persistent, user-owned definition of reactive work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier.
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub owner: String,
    /// Inactive jobs ignore node changes and scheduled triggers.
    #[serde(default)]
    pub inactive: bool,
    /// Trigger once immediately after creation.
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub stoppable: bool,
    #[serde(default)]
    pub has_progress: bool,
    /// Worker count of this job's dispatcher. Zero means the configured default.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Subscribed events, e.g. `NODE_CHANGE:0`.
    #[serde(default)]
    pub event_names: Vec<String>,
    /// Timer descriptor, evaluated by the timer service only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<serde_json::Value>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Query-time denormalisation, never persisted with the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

fn default_max_concurrency() -> u32 {
    DEFAULT_MAX_CONCURRENCY
}

impl Job {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            owner: String::new(),
            inactive: false,
            auto_start: false,
            stoppable: false,
            has_progress: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            event_names: Vec::new(),
            schedule: None,
            actions: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_event(mut self, event_name: &str) -> Self {
        self.event_names.push(event_name.to_string());
        self
    }

    pub fn with_max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Copy of the job with the transient `tasks` field cleared.
    pub fn without_tasks(&self) -> Self {
        Self {
            tasks: Vec::new(),
            ..self.clone()
        }
    }

    pub fn subscribes_to(&self, event_name: &str) -> bool {
        self.event_names.iter().any(|e| e == event_name)
    }

    /// Worker count for this job's dispatcher.
    pub fn concurrency(&self, default: u32) -> usize {
        let max = if self.max_concurrency == 0 {
            default
        } else {
            self.max_concurrency
        };
        max.max(1) as usize
    }
}

/// A node in a job's action tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identifier resolved in the action registry.
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_selector: Option<NodesSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_selector: Option<UsersSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_filter: Option<NodesFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_filter: Option<UsersFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filter: Option<SourceFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chained_actions: Vec<Action>,
}

impl Action {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_nodes_selector(mut self, selector: NodesSelector) -> Self {
        self.nodes_selector = Some(selector);
        self
    }

    pub fn with_users_selector(mut self, selector: UsersSelector) -> Self {
        self.users_selector = Some(selector);
        self
    }

    pub fn with_nodes_filter(mut self, filter: NodesFilter) -> Self {
        self.nodes_filter = Some(filter);
        self
    }

    pub fn with_users_filter(mut self, filter: UsersFilter) -> Self {
        self.users_filter = Some(filter);
        self
    }

    pub fn with_source_filter(mut self, filter: SourceFilter) -> Self {
        self.source_filter = Some(filter);
        self
    }

    pub fn chain(mut self, action: Action) -> Self {
        self.chained_actions.push(action);
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn has_selectors(&self) -> bool {
        self.nodes_selector.is_some() || self.users_selector.is_some()
    }

    /// Copy without chained actions, as recorded in action logs.
    pub fn without_chain(&self) -> Self {
        Self {
            chained_actions: Vec::new(),
            ..self.clone()
        }
    }
}

/// Lifecycle state of a task. The integer values are wire-stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum TaskStatus {
    #[default]
    Unknown,
    Idle,
    Running,
    Paused,
    Finished,
    Interrupted,
    Error,
    /// Query wildcard, never a real state.
    Any,
}

impl TaskStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Idle => 1,
            Self::Running => 2,
            Self::Paused => 3,
            Self::Finished => 4,
            Self::Interrupted => 5,
            Self::Error => 6,
            Self::Any => 7,
        }
    }

    /// Whether a task in this state passes the `filter` status.
    pub fn matches(self, filter: TaskStatus) -> bool {
        filter == TaskStatus::Any || self == filter
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Interrupted | Self::Error)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "unknown" => Self::Unknown,
            "idle" => Self::Idle,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "finished" => Self::Finished,
            "interrupted" => Self::Interrupted,
            "error" => Self::Error,
            "any" => Self::Any,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

impl From<TaskStatus> for i32 {
    fn from(s: TaskStatus) -> Self {
        s.as_i32()
    }
}

impl TryFrom<i32> for TaskStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, String> {
        Ok(match value {
            0 => Self::Unknown,
            1 => Self::Idle,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Finished,
            5 => Self::Interrupted,
            6 => Self::Error,
            7 => Self::Any,
            other => return Err(format!("unknown task status {other}")),
        })
    }
}

/// Record of one action execution inside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub action: Action,
    pub input: ActionMessage,
    pub output: ActionMessage,
}

/// One execution of a job triggered by one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub job_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub progress: f32,
    /// Unix seconds.
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub can_stop: bool,
    #[serde(default)]
    pub can_pause: bool,
    #[serde(default)]
    pub has_progress: bool,
    #[serde(default)]
    pub action_logs: Vec<ActionLog>,
    /// Actions still in flight when this snapshot was taken.
    #[serde(default)]
    pub rc: i32,
}

impl Task {
    /// A fresh idle task for `job`.
    pub fn for_job(job: &Job) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            status: TaskStatus::Idle,
            status_message: String::new(),
            progress: 0.0,
            start_time: 0,
            end_time: 0,
            can_stop: job.stoppable,
            can_pause: false,
            has_progress: job.has_progress,
            action_logs: Vec::new(),
            rc: 0,
        }
    }
}

/// Current time in unix seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults_from_json() {
        let job: Job = serde_json::from_str(r#"{"id":"j1","actions":[{"id":"noop"}]}"#).unwrap();
        assert_eq!(job.max_concurrency, 20);
        assert!(!job.auto_start);
        assert_eq!(job.actions[0].id, "noop");
        assert!(job.tasks.is_empty());
    }

    #[test]
    fn test_job_roundtrip_without_tasks() {
        let mut job = Job::new("j1", "Thumbnails")
            .with_owner("admin")
            .with_event("NODE_CHANGE:0")
            .with_action(Action::new("a").with_param("k", "v").chain(Action::new("b")));
        job.schedule = Some(serde_json::json!({"iso8601": "R/2026-01-01T00:00:00Z/PT1H"}));
        job.tasks.push(Task::for_job(&job));

        let stored = serde_json::to_string(&job.without_tasks()).unwrap();
        let back: Job = serde_json::from_str(&stored).unwrap();
        assert_eq!(back, job.without_tasks());
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&TaskStatus::Finished).unwrap(), "4");
        let s: TaskStatus = serde_json::from_str("6").unwrap();
        assert_eq!(s, TaskStatus::Error);
        assert!(serde_json::from_str::<TaskStatus>("9").is_err());
        assert!(TaskStatus::Error.matches(TaskStatus::Any));
        assert!(!TaskStatus::Error.matches(TaskStatus::Finished));
        assert_eq!(TaskStatus::parse("Running"), Some(TaskStatus::Running));
    }

    #[test]
    fn test_concurrency_falls_back_to_default() {
        let job = Job::new("j", "").with_max_concurrency(0);
        assert_eq!(job.concurrency(20), 20);
        assert_eq!(job.with_max_concurrency(3).concurrency(20), 3);
    }

    #[test]
    fn test_action_without_chain() {
        let action = Action::new("a").chain(Action::new("b"));
        assert!(action.without_chain().chained_actions.is_empty());
        assert_eq!(action.without_chain().id, "a");
    }
}
