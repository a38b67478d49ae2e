//! Selectors expand one input message into many.
//!
//! ## Architecture
//! ```text
//! input ─► filters ─► NodesSelector ─► UsersSelector ─► [child messages]
//!                       │                 │
//!                  producer ─ mpsc ─► consumer (one message per object,
//!                                     or one message for all of them)
//! ```
//! Each selector produces [`Selection`]s on a bounded channel; closing the
//! channel is the done signal. Selectors compose by running the next one
//! over every message the previous one emitted.

use async_trait::async_trait;
use cellar_core::{CellarError, Clients, Node, Result, User};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::message::ActionMessage;
use crate::model::Action;
use crate::query::{NodeMatch, Query, UserMatch};

/// One object produced by a selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Node(Node),
    User(User),
}

#[async_trait]
pub trait Selector: Send + Sync {
    /// Whether all selected objects travel in a single message.
    fn multiple_selection(&self) -> bool;

    /// Send every selected object to `out`, then drop it.
    async fn select(
        &self,
        clients: &Clients,
        input: &ActionMessage,
        out: mpsc::Sender<Selection>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodesSelector {
    /// Every node known to the tree, narrowed by `query`.
    #[serde(default)]
    pub all: bool,
    /// Literal paths.
    #[serde(default, alias = "pathes", skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default)]
    pub query: Query<NodeMatch>,
    #[serde(default)]
    pub multiple_selection: bool,
}

impl NodesSelector {
    pub fn paths(paths: &[&str]) -> Self {
        Self {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn query(query: Query<NodeMatch>) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn collect(mut self) -> Self {
        self.multiple_selection = true;
        self
    }
}

#[async_trait]
impl Selector for NodesSelector {
    fn multiple_selection(&self) -> bool {
        self.multiple_selection
    }

    async fn select(
        &self,
        clients: &Clients,
        _input: &ActionMessage,
        out: mpsc::Sender<Selection>,
    ) -> Result<()> {
        if !self.paths.is_empty() {
            for path in &self.paths {
                let node = match clients.tree.read_node(path).await {
                    Ok(node) => node,
                    Err(e) if e.is_not_found() => Node::from_path(path),
                    Err(e) => return Err(e),
                };
                if self.query.matches(&node) && out.send(Selection::Node(node)).await.is_err() {
                    return Ok(());
                }
            }
            return Ok(());
        }
        if !self.all && self.query.is_empty() {
            return Err(CellarError::bad_request(
                "nodes selector needs paths, a query or all",
            ));
        }
        for node in clients.tree.list_nodes("/").await? {
            if self.query.matches(&node) && out.send(Selection::Node(node)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersSelector {
    #[serde(default)]
    pub all: bool,
    /// Literal logins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default)]
    pub query: Query<UserMatch>,
    #[serde(default)]
    pub multiple_selection: bool,
}

impl UsersSelector {
    pub fn logins(logins: &[&str]) -> Self {
        Self {
            users: logins.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn query(query: Query<UserMatch>) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn collect(mut self) -> Self {
        self.multiple_selection = true;
        self
    }
}

#[async_trait]
impl Selector for UsersSelector {
    fn multiple_selection(&self) -> bool {
        self.multiple_selection
    }

    async fn select(
        &self,
        clients: &Clients,
        _input: &ActionMessage,
        out: mpsc::Sender<Selection>,
    ) -> Result<()> {
        if !self.users.is_empty() {
            for login in &self.users {
                let user = match clients.users.read_user(login).await {
                    Ok(user) => user,
                    Err(e) if e.is_not_found() => User {
                        login: login.clone(),
                        ..Default::default()
                    },
                    Err(e) => return Err(e),
                };
                if self.query.matches(&user) && out.send(Selection::User(user)).await.is_err() {
                    return Ok(());
                }
            }
            return Ok(());
        }
        if !self.all && self.query.is_empty() {
            return Err(CellarError::bad_request(
                "users selector needs logins, a query or all",
            ));
        }
        for user in clients.users.list_users().await? {
            if self.query.matches(&user) && out.send(Selection::User(user)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Run `selector` over `input`, returning the objects it produced.
async fn drain(
    selector: &dyn Selector,
    clients: &Clients,
    input: &ActionMessage,
    buffer: usize,
) -> Result<Vec<Selection>> {
    let (tx, mut rx) = mpsc::channel(buffer.max(1));
    let consume = async {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    };
    let (produced, items) = tokio::join!(selector.select(clients, input, tx), consume);
    produced?;
    Ok(items)
}

impl Action {
    /// Messages this action must run on, given the message its parent
    /// produced: filters first, then selectors in the order nodes, users.
    /// An empty result means the branch does not run.
    pub async fn expand(
        &self,
        clients: &Clients,
        input: ActionMessage,
        buffer: usize,
    ) -> Result<Vec<ActionMessage>> {
        let Some(filtered) = self.apply_filters(input) else {
            return Ok(Vec::new());
        };
        let mut messages = vec![filtered];

        if let Some(selector) = &self.nodes_selector {
            let mut next = Vec::new();
            for msg in &messages {
                let nodes: Vec<Node> = drain(selector, clients, msg, buffer)
                    .await?
                    .into_iter()
                    .filter_map(|s| match s {
                        Selection::Node(n) => Some(n),
                        Selection::User(_) => None,
                    })
                    .collect();
                let nodes = self.prune_nodes(nodes);
                if selector.multiple_selection() {
                    if !nodes.is_empty() {
                        next.push(msg.clone().with_nodes(nodes));
                    }
                } else {
                    next.extend(nodes.into_iter().map(|n| msg.clone().with_node(n)));
                }
            }
            messages = next;
        }

        if let Some(selector) = &self.users_selector {
            let mut next = Vec::new();
            for msg in &messages {
                let users: Vec<User> = drain(selector, clients, msg, buffer)
                    .await?
                    .into_iter()
                    .filter_map(|s| match s {
                        Selection::User(u) => Some(u),
                        Selection::Node(_) => None,
                    })
                    .collect();
                let users = self.prune_users(users);
                if selector.multiple_selection() {
                    if !users.is_empty() {
                        next.push(msg.clone().with_users(users));
                    }
                } else {
                    next.extend(users.into_iter().map(|u| msg.clone().with_user(u)));
                }
            }
            messages = next;
        }

        Ok(messages)
    }
}
