//! Outdial configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutdialError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutdialConfig {
    /// SQLite database holding campaigns, plans and dial lists.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// How often the dispatcher looks for work.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// Live dial attempts allowed per campaign.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_campaign: usize,
    /// Select-and-mark attempts before reporting "no eligible entry".
    #[serde(default = "default_select_retries")]
    pub select_retries: u32,
    /// Notifications kept by the in-memory event history.
    #[serde(default = "default_event_history")]
    pub event_history: usize,
}

fn default_database_path() -> String {
    OutdialConfig::home_dir()
        .join("outdial.db")
        .to_string_lossy()
        .into_owned()
}
fn default_dispatch_interval_ms() -> u64 { 1000 }
fn default_max_concurrent() -> usize { 10 }
fn default_select_retries() -> u32 { 3 }
fn default_event_history() -> usize { 100 }

impl Default for OutdialConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            max_concurrent_per_campaign: default_max_concurrent(),
            select_retries: default_select_retries(),
            event_history: default_event_history(),
        }
    }
}

impl OutdialConfig {
    /// Load config from the default path (~/.outdial/config.toml).
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
            .map_err(|e| OutdialError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OutdialError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| OutdialError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    fn validate(&self) -> Result<()> {
        if self.select_retries == 0 {
            return Err(OutdialError::Config("select_retries must be at least 1".into()));
        }
        if self.dispatch_interval_ms == 0 {
            return Err(OutdialError::Config("dispatch_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Outdial home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outdial")
    }
}
