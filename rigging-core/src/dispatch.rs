//! Command dispatch
//!
//! Maps a command name to its artifact, makes sure the artifact is present
//! (installing or updating it in the shared store), then loads and runs
//! its entry point.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::artifact::{Artifact, ArtifactOptions, UpdateOutcome, LATEST};
use crate::error::{DispatchError, Result};
use crate::installer::{Installer, TarballInstaller};
use crate::loader::{ModuleLoader, ProcessLoader};
use crate::registry::{HttpRegistry, RegistryClient};
use crate::settings::Settings;

/// Built-in command backed by a published artifact
pub const INIT_COMMAND: &str = "init";
pub const INIT_ARTIFACT: &str = "@rigging/init";

/// Parsed command as handed to the artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandMetadata {
    /// Command name as typed
    pub name: String,

    /// Positional operands
    #[serde(default)]
    pub operands: Vec<String>,

    /// Parsed options
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl CommandMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Everything forwarded to the artifact, unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    /// Raw arguments following the command name
    pub args: Vec<String>,
    pub command: CommandMetadata,
}

/// Command name → artifact name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    entries: BTreeMap<String, String>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CommandTable {
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(INIT_COMMAND.to_string(), INIT_ARTIFACT.to_string());
        Self { entries }
    }

    /// Add or replace mappings
    pub fn extend(&mut self, commands: &BTreeMap<String, String>) {
        self.entries
            .extend(commands.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn artifact_for(&self, command: &str) -> Option<&str> {
        self.entries.get(command).map(String::as_str)
    }

    /// Registered command names, sorted
    pub fn commands(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// (command, artifact) pairs, sorted by command
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

pub struct Dispatcher {
    settings: Settings,
    commands: CommandTable,
    registry: Arc<dyn RegistryClient>,
    installer: Arc<dyn Installer>,
    loader: Arc<dyn ModuleLoader>,
}

impl Dispatcher {
    pub fn new(
        settings: Settings,
        registry: Arc<dyn RegistryClient>,
        installer: Arc<dyn Installer>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let mut commands = CommandTable::builtin();
        commands.extend(&settings.commands);

        Self {
            settings,
            commands,
            registry,
            installer,
            loader,
        }
    }

    /// Dispatcher using the configured HTTP registry, tarball installer and
    /// process loader
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let registry = Arc::new(HttpRegistry::new(settings.registry_url.as_str())?);
        let installer = Arc::new(TarballInstaller::with_strategy(settings.install_strategy)?);
        let loader = Arc::new(ProcessLoader::new());
        Ok(Self::new(settings, registry, installer, loader))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Run `command_name`, forwarding `invocation` to its artifact
    pub async fn dispatch(&self, command_name: &str, invocation: &Invocation) -> Result<()> {
        let mut artifact = self.prepare_artifact(command_name).await?;

        let root = artifact
            .cache_file_path()
            .unwrap_or_else(|| artifact.target_path().to_path_buf());
        let entry = artifact
            .root_file_path()
            .await?
            .ok_or(DispatchError::EntryPointNotFound { root })?;

        debug!("Dispatching '{}' to {}", command_name, entry.display());
        let module = self.loader.load(&entry).await?;
        module.invoke(invocation).await
    }

    /// Resolve the artifact for `command_name`, installing or updating it
    /// unless a target path override is set
    pub async fn prepare_artifact(&self, command_name: &str) -> Result<Artifact> {
        let name = self.commands.artifact_for(command_name).ok_or_else(|| {
            DispatchError::UnknownCommand {
                command: command_name.to_string(),
                available: self.commands.commands(),
            }
        })?;

        if let Some(target) = &self.settings.target_path {
            info!(
                "Using local artifact for '{}' at {}",
                command_name,
                target.display()
            );
            let options = ArtifactOptions::new(name, LATEST, target);
            return Artifact::new(options, self.registry.clone(), self.installer.clone());
        }

        let options = ArtifactOptions::new(name, LATEST, self.settings.dependencies_dir())
            .with_store_dir(self.settings.store_dir());
        let mut artifact = Artifact::new(options, self.registry.clone(), self.installer.clone())?;

        if artifact.exists().await? {
            if let UpdateOutcome::Installed(version) = artifact.update().await? {
                info!("Updated {} to {}", name, version);
            }
        } else {
            artifact.install().await?;
        }

        Ok(artifact)
    }
}
