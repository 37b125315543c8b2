//! Artifact installation from the registry
//!
//! Downloads an artifact tarball, verifies its integrity, and extracts it
//! into its cache entry. The store directory is shared by every `rig`
//! process on the host and nothing locks it; [`InstallStrategy`] decides
//! what a concurrent or interrupted install can leave behind.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::cache::STAGING_PREFIX;
use crate::error::{BoxError, DispatchError, Result};
use crate::manifest::MANIFEST_FILE;
use crate::registry::{HttpRegistry, RegistryClient};

/// How extracted files reach their cache entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStrategy {
    /// Extract into a private staging directory, then rename into place.
    /// If another process finished the same entry first, its copy is kept.
    #[default]
    Staged,
    /// Extract straight into the final directory. Concurrent installs of
    /// the same entry interleave and the last writer's files remain.
    InPlace,
}

impl FromStr for InstallStrategy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" => Ok(InstallStrategy::Staged),
            "in-place" | "inplace" => Ok(InstallStrategy::InPlace),
            other => Err(DispatchError::InvalidConfiguration(format!(
                "Unknown install strategy '{other}'. Expected 'staged' or 'in-place'"
            ))),
        }
    }
}

/// One artifact version to materialize on disk
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Installation root (the artifact's target path)
    pub root: PathBuf,
    /// Managed cache the entry belongs to, if any
    pub store_dir: Option<PathBuf>,
    pub name: String,
    pub version: String,
    /// Directory that must hold the artifact's files afterwards
    pub destination: PathBuf,
    /// Registry base URL
    pub registry: String,
}

/// Materializes artifact versions on disk
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install `request.name@request.version` into `request.destination`
    ///
    /// Returns the directory holding the artifact. Errors are reported as
    /// [`DispatchError::InstallFailure`] and are never retried.
    async fn materialize(&self, request: &InstallRequest) -> Result<PathBuf>;
}

/// Installer that downloads registry tarballs
pub struct TarballInstaller {
    client: reqwest::Client,
    strategy: InstallStrategy,
}

impl TarballInstaller {
    /// Create an installer with the default strategy
    pub fn new() -> Result<Self> {
        Self::with_strategy(InstallStrategy::default())
    }

    /// Create an installer with a specific placement strategy
    pub fn with_strategy(strategy: InstallStrategy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rigging/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DispatchError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, strategy })
    }

    async fn fetch_tarball(&self, request: &InstallRequest) -> Result<Vec<u8>, BoxError> {
        let registry = HttpRegistry::new(request.registry.as_str())?;
        let metadata = registry
            .fetch_metadata(&request.name)
            .await?
            .ok_or_else(|| format!("'{}' is not published on {}", request.name, request.registry))?;

        let version = metadata
            .get_version(&request.version)
            .ok_or_else(|| format!("version {} is not published", request.version))?;

        if let Some(message) = &version.deprecated {
            warn!("{}@{} is deprecated: {}", request.name, request.version, message);
        }

        let dist = version
            .dist
            .as_ref()
            .ok_or("registry metadata has no download location")?;

        info!(
            "Downloading {}@{} from {}",
            request.name, request.version, dist.tarball
        );

        let response = self
            .client
            .get(&dist.tarball)
            .send()
            .await
            .map_err(|e| format!("failed to download {}: {e}", dist.tarball))?;

        if !response.status().is_success() {
            return Err(format!(
                "download failed: HTTP {} for {}",
                response.status(),
                dist.tarball
            )
            .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read download response: {e}"))?;

        if let Some(integrity) = &dist.integrity {
            verify_integrity(&bytes, integrity)?;
            debug!("Verified integrity: {}", integrity);
        }

        Ok(bytes.to_vec())
    }

    /// Place the archive's files at `destination`
    fn unpack(&self, bytes: &[u8], destination: &Path) -> Result<PathBuf, BoxError> {
        let parent = destination
            .parent()
            .ok_or("install destination has no parent directory")?;
        std::fs::create_dir_all(parent)?;

        match self.strategy {
            InstallStrategy::InPlace => {
                std::fs::create_dir_all(destination)?;
                extract_package(bytes, destination)?;
                ensure_manifest(destination)?;
            }
            InstallStrategy::Staged => {
                // Removed on drop unless renamed into place
                let staging = tempfile::Builder::new()
                    .prefix(STAGING_PREFIX)
                    .tempdir_in(parent)?;
                extract_package(bytes, staging.path())?;
                ensure_manifest(staging.path())?;

                if let Err(e) = std::fs::rename(staging.path(), destination) {
                    if destination.join(MANIFEST_FILE).is_file() {
                        info!(
                            "{} was completed by another process, keeping it",
                            destination.display()
                        );
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(destination.to_path_buf())
    }
}

#[async_trait]
impl Installer for TarballInstaller {
    async fn materialize(&self, request: &InstallRequest) -> Result<PathBuf> {
        let fail = |e: BoxError| DispatchError::install(&request.name, &request.version, e);

        let bytes = self.fetch_tarball(request).await.map_err(fail)?;
        let install_dir = self.unpack(&bytes, &request.destination).map_err(fail)?;

        info!(
            "Installed {}@{} to {}",
            request.name,
            request.version,
            install_dir.display()
        );
        Ok(install_dir)
    }
}

/// Check a payload against a subresource integrity string
///
/// The first `sha512` or `sha256` hash in the string is checked; strings
/// using only other algorithms are accepted with a warning.
pub fn verify_integrity(bytes: &[u8], integrity: &str) -> Result<(), BoxError> {
    for candidate in integrity.split_whitespace() {
        let Some((algorithm, expected)) = candidate.split_once('-') else {
            continue;
        };

        let actual = match algorithm {
            "sha512" => STANDARD.encode(Sha512::digest(bytes)),
            "sha256" => STANDARD.encode(Sha256::digest(bytes)),
            _ => continue,
        };

        if actual != expected {
            return Err(format!(
                "Integrity verification failed!\nExpected: {candidate}\nActual: {algorithm}-{actual}"
            )
            .into());
        }
        return Ok(());
    }

    warn!("No supported hash in integrity '{}', skipping verification", integrity);
    Ok(())
}

/// Extract a gzipped tarball, dropping its single top-level directory
fn extract_package(bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let path = entry.path()?.into_owned();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping link in archive: {}", path.display());
            continue;
        }

        let relative: PathBuf = path.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            warn!("Skipping unsafe archive path: {}", path.display());
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }

    Ok(())
}

fn ensure_manifest(dir: &Path) -> Result<(), BoxError> {
    if dir.join(MANIFEST_FILE).is_file() {
        Ok(())
    } else {
        Err(format!("archive does not contain a {MANIFEST_FILE}").into())
    }
}
