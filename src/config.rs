//! Agent configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::paths;

fn default_poll_interval() -> u64 {
    60
}

fn default_telemetry_interval() -> u64 {
    300
}

/// Agent configuration, stored as TOML under the config dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Control plane base URL.
    #[serde(default)]
    pub server_url: String,

    /// Device identifier assigned at enrollment.
    #[serde(default)]
    pub device_id: String,

    /// Seconds between job polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between telemetry submissions.
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            server_url: String::new(),
            device_id: String::new(),
            poll_interval_secs: default_poll_interval(),
            telemetry_interval_secs: default_telemetry_interval(),
        }
    }
}

impl AgentConfig {
    /// Path of the config file.
    pub fn path() -> Result<PathBuf> {
        Ok(paths::config_dir()?.join("config.toml"))
    }

    /// Load the config, falling back to defaults when the file is absent.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content).context("Invalid TOML format in drover config")
    }

    /// Save the config, creating the config dir as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let dir = paths::config_dir()?;
        std::fs::create_dir_all(&dir)?;

        let path = dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
