//! Filters: pure reducers of an [`ActionMessage`].

use cellar_core::{Node, User};
use serde::{Deserialize, Serialize};

use crate::message::ActionMessage;
use crate::model::Action;
use crate::query::{NodeMatch, Query, SourceContext, SourceMatch, UserMatch};

pub trait Filter {
    /// Reduce `input`. The flag is false when the filter rejected the
    /// message as a whole.
    fn filter(&self, input: ActionMessage) -> (ActionMessage, bool);
}

/// Keeps the nodes matching its query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodesFilter {
    #[serde(default)]
    pub query: Query<NodeMatch>,
}

impl NodesFilter {
    pub fn new(query: Query<NodeMatch>) -> Self {
        Self { query }
    }

    pub fn keep(&self, nodes: Vec<Node>) -> Vec<Node> {
        nodes.into_iter().filter(|n| self.query.matches(n)).collect()
    }
}

impl Filter for NodesFilter {
    fn filter(&self, mut input: ActionMessage) -> (ActionMessage, bool) {
        let had_nodes = !input.nodes.is_empty();
        input.nodes = self.keep(std::mem::take(&mut input.nodes));
        let passed = !had_nodes || !input.nodes.is_empty();
        (input, passed)
    }
}

/// Keeps the users matching its query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersFilter {
    #[serde(default)]
    pub query: Query<UserMatch>,
}

impl UsersFilter {
    pub fn new(query: Query<UserMatch>) -> Self {
        Self { query }
    }

    pub fn keep(&self, users: Vec<User>) -> Vec<User> {
        users.into_iter().filter(|u| self.query.matches(u)).collect()
    }
}

impl Filter for UsersFilter {
    fn filter(&self, mut input: ActionMessage) -> (ActionMessage, bool) {
        let had_users = !input.users.is_empty();
        input.users = self.keep(std::mem::take(&mut input.users));
        let passed = !had_users || !input.users.is_empty();
        (input, passed)
    }
}

/// Evaluates the triggering request and the upstream output. A rejected
/// message loses all its nodes and users.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFilter {
    #[serde(default)]
    pub query: Query<SourceMatch>,
}

impl SourceFilter {
    pub fn new(query: Query<SourceMatch>) -> Self {
        Self { query }
    }
}

impl Filter for SourceFilter {
    fn filter(&self, mut input: ActionMessage) -> (ActionMessage, bool) {
        let ctx = SourceContext {
            event: input.event.as_deref(),
            last_output: input.last_output(),
        };
        if self.query.matches(&ctx) {
            return (input, true);
        }
        input.nodes.clear();
        input.users.clear();
        (input, false)
    }
}

impl Action {
    /// Run this action's filters over its input, in the order nodes, users,
    /// source. `None` means the branch is skipped.
    pub fn apply_filters(&self, input: ActionMessage) -> Option<ActionMessage> {
        let mut msg = input;
        if let Some(f) = &self.nodes_filter {
            msg = f.filter(msg).0;
        }
        if let Some(f) = &self.users_filter {
            msg = f.filter(msg).0;
        }
        if let Some(f) = &self.source_filter {
            let (filtered, passed) = f.filter(msg);
            if !passed && filtered.is_empty() {
                return None;
            }
            msg = filtered;
        }
        Some(msg)
    }

    /// Nodes produced by a selector, pruned by this action's nodes filter.
    pub fn prune_nodes(&self, nodes: Vec<Node>) -> Vec<Node> {
        match &self.nodes_filter {
            Some(f) => f.keep(nodes),
            None => nodes,
        }
    }

    /// Users produced by a selector, pruned by this action's users filter.
    pub fn prune_users(&self, users: Vec<User>) -> Vec<User> {
        match &self.users_filter {
            Some(f) => f.keep(users),
            None => users,
        }
    }
}
