//! Identity model: users as served by the identity service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{CellarError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub uuid: String,
    pub login: String,
    #[serde(default)]
    pub group_path: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl User {
    pub fn new(login: &str) -> Self {
        Self {
            uuid: login.to_string(),
            login: login.to_string(),
            group_path: "/".into(),
            profile: "standard".into(),
            ..Default::default()
        }
    }
}

/// Read access to the identity service.
#[async_trait]
pub trait UserClient: Send + Sync {
    async fn read_user(&self, login: &str) -> Result<User>;

    /// Every user, ordered by login.
    async fn list_users(&self) -> Result<Vec<User>>;
}

#[derive(Default)]
pub struct MemoryUsers {
    users: RwLock<BTreeMap<String, User>>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        for user in users {
            store.insert(user);
        }
        store
    }

    pub fn insert(&self, user: User) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.insert(user.login.clone(), user);
    }
}

#[async_trait]
impl UserClient for MemoryUsers {
    async fn read_user(&self, login: &str) -> Result<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users
            .get(login)
            .cloned()
            .ok_or_else(|| CellarError::not_found(format!("user {login}")))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        Ok(users.values().cloned().collect())
    }
}
