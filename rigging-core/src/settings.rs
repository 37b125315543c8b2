//! Process-wide settings
//!
//! Resolved once by the CLI before dispatch and read-only afterwards.
//! Sources, later ones winning:
//!
//! 1. Built-in defaults
//! 2. `<home>/config.yaml`
//! 3. Environment variables (`RIG_REGISTRY`, `RIG_INSTALL_STRATEGY`, `RIG_TARGET_PATH`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::installer::InstallStrategy;
use crate::registry::DEFAULT_REGISTRY_URL;

/// Absolute home path override
pub const HOME_PATH_ENV: &str = "RIG_HOME_PATH";
/// Home directory name under the user's home
pub const HOME_DIR_ENV: &str = "RIG_HOME";
/// Developer override: run the artifact found here instead of the cache
pub const TARGET_PATH_ENV: &str = "RIG_TARGET_PATH";
pub const REGISTRY_ENV: &str = "RIG_REGISTRY";
pub const INSTALL_STRATEGY_ENV: &str = "RIG_INSTALL_STRATEGY";

pub const DEFAULT_HOME_DIR: &str = ".rigging";
pub const CONFIG_FILE: &str = "config.yaml";

/// Managed dependencies live under `<home>/dependencies`
const DEPENDENCIES_DIR: &str = "dependencies";
/// Cache entries live under `<home>/dependencies/node_modules`
const STORE_DIR: &str = "node_modules";

/// On-disk shape of `config.yaml`; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    /// Registry base URL
    pub registry: Option<String>,

    /// Extra command → artifact mappings
    pub commands: BTreeMap<String, String>,

    pub install_strategy: Option<InstallStrategy>,
}

impl SettingsFile {
    pub fn from_yaml(content: &str) -> serde_yaml_ng::Result<Self> {
        serde_yaml_ng::from_str(content)
    }

    /// Read `path`, treating a missing file as empty
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| DispatchError::io(path, e))?;
        Self::from_yaml(&content).map_err(|e| {
            DispatchError::InvalidConfiguration(format!(
                "Failed to parse {}: {e}",
                path.display()
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of everything this tool writes
    pub home_path: PathBuf,

    /// Developer override; when set nothing is installed
    pub target_path: Option<PathBuf>,

    pub registry_url: String,

    /// Commands registered on top of the built-in table
    pub commands: BTreeMap<String, String>,

    pub install_strategy: InstallStrategy,
}

impl Settings {
    /// Defaults rooted at `home_path`
    pub fn new(home_path: impl Into<PathBuf>) -> Self {
        Self {
            home_path: home_path.into(),
            target_path: None,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            commands: BTreeMap::new(),
            install_strategy: InstallStrategy::default(),
        }
    }

    /// Resolve the home path and load settings from the environment
    pub fn from_env() -> Result<Self> {
        Self::load(default_home_path()?)
    }

    /// Load settings for `home_path` from its config file and the environment
    pub fn load(home_path: impl Into<PathBuf>) -> Result<Self> {
        let mut settings = Self::new(home_path);
        let file = SettingsFile::load(&settings.config_path())?;
        settings.apply_file(file);
        settings.apply_env()?;

        debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    pub fn with_target_path(mut self, target_path: Option<PathBuf>) -> Self {
        if target_path.is_some() {
            self.target_path = target_path;
        }
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.home_path.join(CONFIG_FILE)
    }

    /// Installation root for managed artifacts
    pub fn dependencies_dir(&self) -> PathBuf {
        self.home_path.join(DEPENDENCIES_DIR)
    }

    /// Shared store holding every cache entry
    pub fn store_dir(&self) -> PathBuf {
        self.dependencies_dir().join(STORE_DIR)
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(registry) = file.registry {
            self.registry_url = registry;
        }
        if let Some(strategy) = file.install_strategy {
            self.install_strategy = strategy;
        }
        self.commands.extend(file.commands);
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(registry) = non_empty_env(REGISTRY_ENV) {
            self.registry_url = registry;
        }
        if let Some(strategy) = non_empty_env(INSTALL_STRATEGY_ENV) {
            self.install_strategy = strategy.parse()?;
        }
        if let Some(target) = non_empty_env(TARGET_PATH_ENV) {
            self.target_path = Some(PathBuf::from(target));
        }
        Ok(())
    }
}

/// `RIG_HOME_PATH`, else `~/<RIG_HOME or .rigging>`
pub fn default_home_path() -> Result<PathBuf> {
    if let Some(path) = non_empty_env(HOME_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let user_home = dirs::home_dir().ok_or_else(|| {
        DispatchError::InvalidConfiguration("Could not determine home directory".to_string())
    })?;
    let dir_name = non_empty_env(HOME_DIR_ENV).unwrap_or_else(|| DEFAULT_HOME_DIR.to_string());
    Ok(user_home.join(dir_name))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
