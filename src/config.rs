use anyhow::{Context, Result};
use directories::ProjectDirs;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "trackplan";
const CONFIG_FILE: &str = "config.json";

pub const CONFIG_ENV: &str = "TRACKPLAN_CONFIG";
pub const HOME_ENV: &str = "TRACKPLAN_HOME";
pub const PROJECT_ENV: &str = "TRACKPLAN_PROJECT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding every project store. Falls back to the platform data
    /// directory when unset.
    pub workspace_root: Option<PathBuf>,
    /// Project used when no active project has been chosen.
    pub default_project: String,
    pub busy_timeout_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Per-invocation project override from the environment; never saved.
    #[serde(skip)]
    pub project_override: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: None,
            default_project: "default".to_string(),
            busy_timeout_ms: 5000,
            log_filter: "trackplan=info".to_string(),
            project_override: None,
        }
    }
}

impl Config {
    /// Loads the config file (from `TRACKPLAN_CONFIG`, else the user config
    /// directory) and applies environment overrides. A missing file yields
    /// defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => get_config_path().ok(),
        };

        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Applies `TRACKPLAN_HOME` and `TRACKPLAN_PROJECT` as returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(HOME_ENV).filter(|v| !v.is_empty()) {
            self.workspace_root = Some(PathBuf::from(home));
        }
        if let Some(project) = lookup(PROJECT_ENV).filter(|v| !v.is_empty()) {
            self.project_override = Some(project);
        }
    }

    pub fn workspace_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.workspace_root {
            return Ok(root.clone());
        }
        let dirs = ProjectDirs::from("", "", APP_NAME)
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Save the configuration to the user config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "busy_timeout_ms": 250 }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.default_project, "default");
        assert_eq!(config.log_filter, "trackplan=info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn env_overrides_root_and_project() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            HOME_ENV => Some("/tmp/plans".to_string()),
            PROJECT_ENV => Some("alpha".to_string()),
            _ => None,
        });
        assert_eq!(config.workspace_root().unwrap(), PathBuf::from("/tmp/plans"));
        assert_eq!(config.project_override.as_deref(), Some("alpha"));
    }

    #[test]
    fn save_round_trips_without_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            default_project: "main".to_string(),
            project_override: Some("scratch".to_string()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_project, "main");
        assert!(loaded.project_override.is_none());
    }
}
