//! # Cellar Core
//!
//! Types shared by every Cellar service: configuration, the error taxonomy,
//! the tree `Node` and identity `User` models, the event payloads published on
//! the bus, and the client traits the scheduler uses to reach the tree and
//! identity backends.

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod idm;
pub mod tree;

pub use bus::{Subscription, Topic};
pub use config::CellarConfig;
pub use error::{CellarError, ErrorKind, Result};
pub use events::{JobTriggerEvent, NodeChangeEvent, NodeChangeType};
pub use idm::{MemoryUsers, User, UserClient};
pub use tree::{MemoryTree, Node, NodeType, TreeClient};

use std::sync::Arc;

/// Backend clients handed to selectors and concrete actions.
#[derive(Clone)]
pub struct Clients {
    pub tree: Arc<dyn TreeClient>,
    pub users: Arc<dyn UserClient>,
}

impl Clients {
    pub fn new(tree: Arc<dyn TreeClient>, users: Arc<dyn UserClient>) -> Self {
        Self { tree, users }
    }

    /// Clients backed by empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            tree: Arc::new(MemoryTree::new()),
            users: Arc::new(MemoryUsers::new()),
        }
    }
}
