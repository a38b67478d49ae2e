//! Action registry: maps action ids to factories of fresh concrete actions.
//! Filled once at startup, then shared read-only by every worker.

use cellar_core::{CellarError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::ConcreteAction;

type Factory = Arc<dyn Fn() -> Box<dyn ConcreteAction> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ActionRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `id`, replacing any previous one.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Box<dyn ConcreteAction> + Send + Sync + 'static,
    {
        if self.factories.insert(id.to_string(), Arc::new(factory)).is_some() {
            tracing::warn!("⚠️ Action '{id}' registered twice, keeping the last one");
        }
    }

    /// A fresh instance of the action registered under `id`.
    pub fn create(&self, id: &str) -> Result<Box<dyn ConcreteAction>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| CellarError::not_found(format!("action {id}")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
