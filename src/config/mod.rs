//! Configuration management.
//!
//! This module resolves Harbor's machine-local directories and loads the
//! small JSON settings document.
//!
//! # Layout
//!
//! - **Home**: `~/.harbor/` (override with `HARBOR_HOME`)
//! - **Database**: `~/.harbor/data/harbor.db` (override with `--db` / `HARBOR_DB`)
//! - **Environments**: `~/.harbor/environments.json` (never synchronized)
//! - **Settings**: `~/.harbor/config.json` (sync repository, remote, branch)

use crate::error::{Error, Result};
use crate::sync::MergeStrategy;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the Harbor home directory.
///
/// `HARBOR_HOME` wins when set and non-empty; otherwise `~/.harbor/`.
#[must_use]
pub fn harbor_home() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HARBOR_HOME") {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    directories::BaseDirs::new().map(|b| b.home_dir().join(".harbor"))
}

/// Path of the machine-local environment registry document.
#[must_use]
pub fn environments_path() -> Option<PathBuf> {
    harbor_home().map(|dir| dir.join("environments.json"))
}

/// Path of the settings document.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    harbor_home().map(|dir| dir.join("config.json"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided (from `--db` or `HARBOR_DB`), use it
/// 2. `<harbor home>/data/harbor.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    harbor_home().map(|dir| dir.join("data").join("harbor.db"))
}

/// Settings for the git-backed sync transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Working tree of the dedicated sync repository.
    pub repo_dir: PathBuf,
    /// Remote name to push to and pull from.
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Branch carrying the snapshots.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Strategy used by `sync pull` / `sync import` when none is given.
    #[serde(default)]
    pub default_strategy: Option<MergeStrategy>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl SyncSettings {
    /// Settings with the default remote and branch.
    #[must_use]
    pub fn new(repo_dir: PathBuf) -> Self {
        Self {
            repo_dir,
            remote: default_remote(),
            branch: default_branch(),
            default_strategy: None,
        }
    }
}

/// The full settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarborConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSettings>,
}

/// Load settings from an explicit path. A missing file yields defaults.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<HarborConfig> {
    if !path.exists() {
        return Ok(HarborConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Save settings to an explicit path, creating parent directories.
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be written.
pub fn save_config_to(path: &Path, config: &HarborConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
}

/// Load settings from the default location.
///
/// # Errors
///
/// Returns an error if the home directory is unknown or the file is invalid.
pub fn load_config() -> Result<HarborConfig> {
    let path = config_path().ok_or(Error::Config("Could not determine home directory".into()))?;
    load_config_from(&path)
}

/// Save settings to the default location.
///
/// # Errors
///
/// Returns an error if the home directory is unknown or the write fails.
pub fn save_config(config: &HarborConfig) -> Result<()> {
    let path = config_path().ok_or(Error::Config("Could not determine home directory".into()))?;
    save_config_to(&path, config)
}

/// Load the sync settings, failing when none are configured.
///
/// # Errors
///
/// Returns `Error::SyncNotConfigured` when `config.json` has no `sync` section.
pub fn require_sync_settings() -> Result<SyncSettings> {
    let path = config_path().ok_or(Error::Config("Could not determine home directory".into()))?;
    load_config_from(&path)?
        .sync
        .ok_or(Error::SyncNotConfigured { config_path: path })
}

/// Get the running machine's hostname.
///
/// Priority:
/// 1. `HOSTNAME` environment variable
/// 2. `/etc/hostname`
/// 3. The `hostname` command
#[must_use]
pub fn current_hostname() -> Option<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return Some(name.trim().to_string());
        }
    }

    if let Ok(name) = fs::read_to_string("/etc/hostname") {
        if !name.trim().is_empty() {
            return Some(name.trim().to_string());
        }
    }

    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Get the default actor name.
///
/// Priority:
/// 1. `HARBOR_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("HARBOR_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_actor() {
        let actor = default_actor();
        assert!(!actor.is_empty());
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/harbor.db");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_resolve_db_path_default_name() {
        let path = resolve_db_path(None).unwrap();
        assert!(path.ends_with("data/harbor.db"));
    }

    #[test]
    fn test_missing_config_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config_from(&temp_dir.path().join("config.json")).unwrap();
        assert!(config.sync.is_none());
    }

    #[test]
    fn test_config_roundtrip_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"sync":{"repo_dir":"/srv/harbor-state"}}"#).unwrap();

        let config = load_config_from(&path).unwrap();
        let sync = config.sync.clone().unwrap();
        assert_eq!(sync.remote, "origin");
        assert_eq!(sync.branch, "main");
        assert_eq!(sync.default_strategy, None);

        let mut updated = config;
        updated.sync = Some(SyncSettings {
            default_strategy: Some(MergeStrategy::Manual),
            ..sync
        });
        save_config_to(&path, &updated).unwrap();
        let reloaded = load_config_from(&path).unwrap().sync.unwrap();
        assert_eq!(reloaded.default_strategy, Some(MergeStrategy::Manual));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(Error::Config(_))));
    }
}
