//! Centralized path resolution for hostnet
//!
//! # Environment Variables
//!
//! - `HOSTNET_CONFIG_DIR` - Override config directory
//! - `HOSTNET_STATE_DIR` - Override state directory (run state, lock, backups)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `HOSTNET_CONFIG_DIR` environment variable
//! 2. `/etc/hostnet` when running as root
//! 3. `XDG_CONFIG_HOME/hostnet` (if set)
//! 4. `~/.config/hostnet`
//!
//! For state_dir():
//! 1. `HOSTNET_STATE_DIR` environment variable
//! 2. `/var/lib/hostnet` when running as root
//! 3. `XDG_STATE_HOME/hostnet` (if set)
//! 4. `~/.local/state/hostnet`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "HOSTNET_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "HOSTNET_STATE_DIR";

const SYSTEM_CONFIG_DIR: &str = "/etc/hostnet";
const SYSTEM_STATE_DIR: &str = "/var/lib/hostnet";

/// Whether the process runs with root privileges
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

/// Get the hostnet config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {ENV_CONFIG_DIR}: {}", path.display());
        return Ok(path);
    }

    if is_root() {
        return Ok(PathBuf::from(SYSTEM_CONFIG_DIR));
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config).join("hostnet"));
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("hostnet"))
}

/// Get the hostnet state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {ENV_STATE_DIR}: {}", path.display());
        return Ok(path);
    }

    if is_root() {
        return Ok(PathBuf::from(SYSTEM_STATE_DIR));
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg_state).join("hostnet"));
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("hostnet"))
}

/// Default config file: `<config_dir>/hostnet.toml`
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("hostnet.toml"))
}

/// Run state file: `<state_dir>/state.toml`
pub fn state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.toml"))
}

/// Advisory lock held by mutating commands
pub fn lock_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("hostnet.lock"))
}

/// Default snapshot directory
pub fn backup_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("backups"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
