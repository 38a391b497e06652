//! Path resolution for agent files.
//!
//! # Environment Variables
//!
//! - `DROVER_CONFIG_DIR` - Override config directory
//! - `DROVER_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `DROVER_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/drover` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\drover`
//!    - macOS/Linux: `~/.config/drover`
//!
//! For state_dir():
//! 1. `DROVER_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/drover` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\drover`
//!    - macOS/Linux: `~/.local/state/drover`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "DROVER_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "DROVER_STATE_DIR";

/// Get the drover config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("drover");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join("drover");
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("drover");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the drover state directory path (pinned signing key, cached reports)
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = PathBuf::from(dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("drover");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("drover");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("drover");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

// ============================================================================
// Tests
// ============================================================================
