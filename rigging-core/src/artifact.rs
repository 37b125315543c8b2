//! Artifact lifecycle: resolve, check, install, update, locate
//!
//! An [`Artifact`] is built for one command execution. Its version starts
//! as the requested [`VersionSpec`] and is committed to a concrete version
//! at most once, by [`Artifact::prepare`] (or by [`Artifact::update`] when
//! it installs a newer release).

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{cache_path, name_prefix, resolve_entry_point};
use crate::error::{DispatchError, Result};
use crate::installer::{InstallRequest, Installer};
use crate::registry::RegistryClient;
use crate::version::{select_latest, select_matching};

/// Sentinel requesting the newest published version
pub const LATEST: &str = "latest";

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Latest,
    Exact(Version),
    Range(VersionReq),
}

impl FromStr for VersionSpec {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case(LATEST) {
            return Ok(VersionSpec::Latest);
        }
        if let Ok(version) = Version::parse(s) {
            return Ok(VersionSpec::Exact(version));
        }
        VersionReq::parse(s).map(VersionSpec::Range).map_err(|e| {
            DispatchError::InvalidConfiguration(format!("Invalid version '{s}': {e}"))
        })
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => f.write_str(LATEST),
            VersionSpec::Exact(version) => write!(f, "{version}"),
            VersionSpec::Range(req) => write!(f, "{req}"),
        }
    }
}

/// Version of an artifact instance; only ever moves from unresolved to resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionState {
    Unresolved(VersionSpec),
    Resolved(Version),
}

/// Result of [`Artifact::update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The latest version was not cached and has been installed
    Installed(Version),
    /// The latest version was already cached; nothing was touched
    Current(Version),
}

/// Request for one artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOptions {
    /// Registry name, possibly scoped (`@scope/name`)
    pub name: String,

    /// Version specifier: "latest", an exact version, or a range
    #[serde(default)]
    pub version: String,

    /// Installation root
    pub target_path: PathBuf,

    /// Managed cache directory; `None` means the caller manages installation
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl ArtifactOptions {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            target_path: target_path.into(),
            store_dir: None,
        }
    }

    pub fn with_store_dir(mut self, store_dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(store_dir.into());
        self
    }
}

/// One artifact bound to a registry and an installer
pub struct Artifact {
    name: String,
    name_prefix: String,
    target_path: PathBuf,
    store_dir: Option<PathBuf>,
    state: VersionState,
    registry: Arc<dyn RegistryClient>,
    installer: Arc<dyn Installer>,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("target_path", &self.target_path)
            .field("store_dir", &self.store_dir)
            .field("state", &self.state)
            .field("registry", &self.registry.url())
            .finish()
    }
}

impl Artifact {
    /// Validate `options` and bind them to a registry and installer
    pub fn new(
        options: ArtifactOptions,
        registry: Arc<dyn RegistryClient>,
        installer: Arc<dyn Installer>,
    ) -> Result<Self> {
        if options.name.trim().is_empty() {
            return Err(DispatchError::InvalidConfiguration(
                "artifact name must not be empty".to_string(),
            ));
        }
        if options.target_path.as_os_str().is_empty() {
            return Err(DispatchError::InvalidConfiguration(format!(
                "target path for '{}' must not be empty",
                options.name
            )));
        }

        let spec: VersionSpec = options.version.parse()?;
        let store_dir = options
            .store_dir
            .filter(|dir| !dir.as_os_str().is_empty());

        Ok(Self {
            name_prefix: name_prefix(&options.name),
            name: options.name,
            target_path: options.target_path,
            store_dir,
            state: VersionState::Unresolved(spec),
            registry,
            installer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn store_dir(&self) -> Option<&Path> {
        self.store_dir.as_deref()
    }

    pub fn state(&self) -> &VersionState {
        &self.state
    }

    /// Committed version, if resolution has happened
    pub fn resolved_version(&self) -> Option<&Version> {
        match &self.state {
            VersionState::Resolved(version) => Some(version),
            VersionState::Unresolved(_) => None,
        }
    }

    /// Cache entry for the committed version, if there is a store and a version
    pub fn cache_file_path(&self) -> Option<PathBuf> {
        let store = self.store_dir.as_deref()?;
        let version = self.resolved_version()?;
        Some(self.cache_entry(store, version))
    }

    /// Create the store and commit to a concrete version
    ///
    /// Safe to call repeatedly: once resolved, the registry is never asked
    /// again by this instance.
    pub async fn prepare(&mut self) -> Result<Version> {
        self.ensure_store_dir().await?;

        let version = match &self.state {
            VersionState::Resolved(version) => return Ok(version.clone()),
            VersionState::Unresolved(spec) => self.resolve(spec).await?,
        };

        debug!("Resolved {} to version {}", self.name, version);
        self.state = VersionState::Resolved(version.clone());
        Ok(version)
    }

    /// Whether the artifact is present on disk
    ///
    /// Without a store this only checks the target path and never touches
    /// the registry.
    pub async fn exists(&mut self) -> Result<bool> {
        let Some(store) = self.store_dir.clone() else {
            return Ok(self.target_path.exists());
        };

        let version = self.prepare().await?;
        let path = self.cache_entry(&store, &version);
        let exists = path.exists();
        debug!("Cache entry {} exists: {}", path.display(), exists);
        Ok(exists)
    }

    /// Install the committed version, resolving it first if needed
    pub async fn install(&mut self) -> Result<PathBuf> {
        let version = self.prepare().await?;
        self.install_version(&version).await
    }

    /// Install the newest published version unless it is already cached
    ///
    /// Asks the registry for the latest version exactly once. An existing
    /// cache entry is trusted as-is and never re-fetched.
    pub async fn update(&mut self) -> Result<UpdateOutcome> {
        self.ensure_store_dir().await?;

        let latest = self.resolve(&VersionSpec::Latest).await?;
        let location = self.location(&latest);

        if location.exists() {
            debug!("{}@{} is current at {}", self.name, latest, location.display());
            return Ok(UpdateOutcome::Current(latest));
        }

        info!("Updating {} to {}", self.name, latest);
        self.install_version(&latest).await?;
        self.state = VersionState::Resolved(latest.clone());
        Ok(UpdateOutcome::Installed(latest))
    }

    /// Entry point of the artifact, or `None` if it declares none
    pub async fn root_file_path(&mut self) -> Result<Option<PathBuf>> {
        let root = match self.store_dir.clone() {
            Some(store) => {
                let version = self.prepare().await?;
                self.cache_entry(&store, &version)
            }
            None => self.target_path.clone(),
        };

        resolve_entry_point(&root)
    }

    async fn ensure_store_dir(&self) -> Result<()> {
        if let Some(store) = &self.store_dir {
            if !store.exists() {
                debug!("Creating store directory {}", store.display());
                tokio::fs::create_dir_all(store)
                    .await
                    .map_err(|e| DispatchError::io(store, e))?;
            }
        }
        Ok(())
    }

    async fn resolve(&self, spec: &VersionSpec) -> Result<Version> {
        let found = match spec {
            VersionSpec::Exact(version) => return Ok(version.clone()),
            VersionSpec::Latest => select_latest(self.registry.as_ref(), &self.name).await?,
            VersionSpec::Range(req) => {
                select_matching(self.registry.as_ref(), req, &self.name).await?
            }
        };

        let raw = found.ok_or_else(|| DispatchError::NoPublishedVersions {
            name: self.name.clone(),
            spec: spec.to_string(),
        })?;

        Version::parse(&raw).map_err(|e| DispatchError::Registry {
            name: self.name.clone(),
            reason: format!("invalid version '{raw}': {e}"),
        })
    }

    fn cache_entry(&self, store: &Path, version: &Version) -> PathBuf {
        cache_path(store, &self.name_prefix, &version.to_string(), &self.name)
    }

    /// Where `version` lives: its cache entry, or the target path without a store
    fn location(&self, version: &Version) -> PathBuf {
        match &self.store_dir {
            Some(store) => self.cache_entry(store, version),
            None => self.target_path.clone(),
        }
    }

    async fn install_version(&self, version: &Version) -> Result<PathBuf> {
        let request = InstallRequest {
            root: self.target_path.clone(),
            store_dir: self.store_dir.clone(),
            name: self.name.clone(),
            version: version.to_string(),
            destination: self.location(version),
            registry: self.registry.url().to_string(),
        };

        info!(
            "Installing {}@{} into {}",
            self.name,
            version,
            request.destination.display()
        );

        self.installer
            .materialize(&request)
            .await
            .map_err(|e| match e {
                e @ DispatchError::InstallFailure { .. } => e,
                other => DispatchError::install(&self.name, version, other),
            })
    }
}
