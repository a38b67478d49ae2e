//! The value flowing between actions of a job's action tree.

use cellar_core::{JobTriggerEvent, Node, NodeChangeEvent, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::now_unix;

/// The stimulus that started a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    NodeChange(NodeChangeEvent),
    Timer(JobTriggerEvent),
}

impl TriggerEvent {
    pub fn node_change(&self) -> Option<&NodeChangeEvent> {
        match self {
            Self::NodeChange(ev) => Some(ev),
            Self::Timer(_) => None,
        }
    }

    /// Request metadata of a node change, if any.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.node_change()
            .and_then(|ev| ev.metadata.get(key))
            .map(String::as_str)
    }
}

/// Result of one executed action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub success: bool,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub string_body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json_body: Vec<u8>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_string: String,
    /// Unix seconds.
    #[serde(default)]
    pub time: i64,
}

impl ActionOutput {
    pub fn success() -> Self {
        Self {
            success: true,
            time: now_unix(),
            ..Default::default()
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            error_string: error.to_string(),
            time: now_unix(),
            ..Default::default()
        }
    }

    pub fn ignored() -> Self {
        Self {
            success: true,
            ignored: true,
            time: now_unix(),
            ..Default::default()
        }
    }

    pub fn with_string(mut self, body: impl Into<String>) -> Self {
        self.string_body = body.into();
        self
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> serde_json::Result<Self> {
        self.json_body = serde_json::to_vec(body)?;
        Ok(self)
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        if self.json_body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.json_body).ok()
    }
}

/// Nodes, users and upstream outputs handed to an action.
///
/// The triggering event is shared by every message of a task; cloning a
/// message never copies it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Arc<TriggerEvent>>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub output_chain: Vec<ActionOutput>,
}

impl ActionMessage {
    /// Root message of a task. A node change seeds `nodes` with its target
    /// node, or its source when the target is absent.
    pub fn from_event(event: TriggerEvent) -> Self {
        let nodes = event
            .node_change()
            .and_then(|ev| ev.node())
            .cloned()
            .into_iter()
            .collect();
        Self {
            event: Some(Arc::new(event)),
            nodes,
            users: Vec::new(),
            output_chain: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes = vec![node];
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users = vec![user];
        self
    }

    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users = users;
        self
    }

    pub fn with_output(mut self, output: ActionOutput) -> Self {
        self.output_chain.push(output);
        self
    }

    pub fn with_error(self, error: &str) -> Self {
        self.with_output(ActionOutput::failure(error))
    }

    /// Mark the action as skipped without failing the task.
    pub fn with_ignore(self) -> Self {
        self.with_output(ActionOutput::ignored())
    }

    pub fn last_output(&self) -> Option<&ActionOutput> {
        self.output_chain.last()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.users.is_empty()
    }

    /// Input as recorded in an action log: no event, no upstream chain.
    pub fn as_log_input(&self) -> Self {
        Self {
            event: None,
            nodes: self.nodes.clone(),
            users: self.users.clone(),
            output_chain: Vec::new(),
        }
    }

    /// Output as recorded in an action log: only the last output is kept.
    pub fn as_log_output(&self) -> Self {
        Self {
            event: None,
            nodes: self.nodes.clone(),
            users: self.users.clone(),
            output_chain: self.last_output().cloned().into_iter().collect(),
        }
    }
}
