//! Cellar configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CellarError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellarConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

impl CellarConfig {
    /// Load config from the default path (~/.cellar/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CellarError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CellarError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CellarError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cellar home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cellar")
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker count for jobs that do not set `max_concurrency`.
    #[serde(default = "default_max_concurrency")]
    pub default_max_concurrency: u32,
    /// Capacity of the channel between a selector and its consumer.
    #[serde(default = "default_selection_buffer")]
    pub selection_buffer: usize,
    /// Capacity of the streaming channel used by the task-state writer.
    #[serde(default = "default_task_update_buffer")]
    pub task_update_buffer: usize,
    /// Deadline handed to each action run, in seconds. Zero disables it.
    #[serde(default)]
    pub action_timeout_secs: u64,
}

pub const DEFAULT_MAX_CONCURRENCY: u32 = 20;

fn default_max_concurrency() -> u32 { DEFAULT_MAX_CONCURRENCY }
fn default_selection_buffer() -> usize { 64 }
fn default_task_update_buffer() -> usize { 256 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: default_max_concurrency(),
            selection_buffer: default_selection_buffer(),
            task_update_buffer: default_task_update_buffer(),
            action_timeout_secs: 0,
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.cellar/jobs.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// In-process message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broadcast depth per topic before slow subscribers start lagging.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize { 1024 }

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CellarConfig::default();
        assert_eq!(config.scheduler.default_max_concurrency, 20);
        assert_eq!(config.bus.capacity, 1024);
        assert!(config.store.path.ends_with("jobs.db"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [scheduler]
            default_max_concurrency = 4

            [store]
            path = "/var/lib/cellar/jobs.db"
        "#;

        let config: CellarConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.default_max_concurrency, 4);
        assert_eq!(config.scheduler.selection_buffer, 64);
        assert_eq!(config.store.path, "/var/lib/cellar/jobs.db");
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: CellarConfig = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.default_max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.bus.capacity, 1024);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("cellar-test-config");
        let path = dir.join("config.toml");
        let mut config = CellarConfig::default();
        config.scheduler.default_max_concurrency = 7;
        config.save_to(&path).unwrap();

        let loaded = CellarConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.default_max_concurrency, 7);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = CellarConfig::home_dir();
        assert!(home.to_string_lossy().contains("cellar"));
    }
}
