//! Event payloads published by the tree, metadata and timer services.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tree::Node;

/// Topic names on the message bus.
pub mod topics {
    pub const TREE_CHANGES: &str = "tree.changes";
    pub const META_CHANGES: &str = "meta.changes";
    pub const TIMER_EVENTS: &str = "timer.events";
    pub const JOB_CONFIG_EVENTS: &str = "job.config.events";
    pub const JOB_TASK_EVENTS: &str = "job.task.events";
}

/// Keys of the source metadata attached to node-change events.
pub mod metadata {
    pub const REMOTE_ADDRESS: &str = "remote-address";
    pub const USER_AGENT: &str = "user-agent";
    pub const WORKSPACE_ID: &str = "workspace-id";
    pub const USER_LOGIN: &str = "user-login";
}

/// Prefix of job event names matching node changes.
pub const NODE_CHANGE_PREFIX: &str = "NODE_CHANGE:";

/// Kind of tree mutation. The integer values are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum NodeChangeType {
    Create,
    Read,
    UpdatePath,
    UpdateContent,
    UpdateMeta,
    Delete,
}

impl NodeChangeType {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Create => 0,
            Self::Read => 1,
            Self::UpdatePath => 2,
            Self::UpdateContent => 3,
            Self::UpdateMeta => 4,
            Self::Delete => 5,
        }
    }

    /// The job event name subscribing to this change, e.g. `NODE_CHANGE:0`.
    pub fn event_name(self) -> String {
        format!("{NODE_CHANGE_PREFIX}{}", self.as_i32())
    }
}

impl From<NodeChangeType> for i32 {
    fn from(t: NodeChangeType) -> Self {
        t.as_i32()
    }
}

impl TryFrom<i32> for NodeChangeType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Create,
            1 => Self::Read,
            2 => Self::UpdatePath,
            3 => Self::UpdateContent,
            4 => Self::UpdateMeta,
            5 => Self::Delete,
            other => return Err(format!("unknown node change type {other}")),
        })
    }
}

/// Published on `tree.changes` and `meta.changes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeChangeEvent {
    #[serde(rename = "type")]
    pub event_type: NodeChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Node>,
    /// Request metadata of the mutation (client address, user agent, workspace).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl NodeChangeEvent {
    pub fn new(event_type: NodeChangeType, source: Option<Node>, target: Option<Node>) -> Self {
        Self {
            event_type,
            source,
            target,
            metadata: BTreeMap::new(),
        }
    }

    pub fn created(target: Node) -> Self {
        Self::new(NodeChangeType::Create, None, Some(target))
    }

    pub fn deleted(source: Node) -> Self {
        Self::new(NodeChangeType::Delete, Some(source), None)
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Target node, falling back to source.
    pub fn node(&self) -> Option<&Node> {
        self.target.as_ref().or(self.source.as_ref())
    }

    pub fn event_name(&self) -> String {
        self.event_type.event_name()
    }
}

/// Published on `timer.events` by the timer service, and by the job service
/// for auto-started jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTriggerEvent {
    pub job_id: String,
    #[serde(default)]
    pub run_now: bool,
    /// Opaque schedule descriptor that fired the trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<serde_json::Value>,
}

impl JobTriggerEvent {
    pub fn run_now(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_now: true,
            schedule: None,
        }
    }

    pub fn scheduled(job_id: &str, schedule: serde_json::Value) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_now: false,
            schedule: Some(schedule),
        }
    }
}
