//! Artifact manifest parsing (package.json)
//!
//! Only the fields the dispatcher needs are modelled; everything else in
//! the manifest is ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::error::{DispatchError, Result};

/// Manifest file name looked up in artifact directories
pub const MANIFEST_FILE: &str = "package.json";

/// An artifact manifest (package.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Published artifact name
    #[serde(default)]
    pub name: Option<String>,

    /// Published version
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Entry module, relative to the manifest directory
    #[serde(default)]
    pub main: Option<String>,
}

impl PackageManifest {
    /// Load manifest from a file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DispatchError::Manifest {
            path: path.to_path_buf(),
            source: e.into(),
        })?;

        Self::from_json(&content).map_err(|e| DispatchError::Manifest {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Load manifest from an artifact directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join(MANIFEST_FILE))
    }

    /// Parse manifest from a JSON string
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Declared entry, ignoring an empty `main`
    pub fn main_entry(&self) -> Option<&str> {
        self.main.as_deref().filter(|m| !m.trim().is_empty())
    }

    /// Nearest directory at or above `start` that holds a manifest
    ///
    /// `start` does not need to exist; relative paths are taken from the
    /// current directory.
    pub fn find_nearest_dir(start: &Path) -> Option<PathBuf> {
        let start = crate::cache::absolutize(start);
        start
            .ancestors()
            .inspect(|dir| trace!("Looking for {} in {}", MANIFEST_FILE, dir.display()))
            .find(|dir| dir.join(MANIFEST_FILE).is_file())
            .map(Path::to_path_buf)
    }

    /// Nearest manifest at or above `start`, with the directory holding it
    pub fn find_nearest(start: &Path) -> Result<Option<(PathBuf, Self)>> {
        match Self::find_nearest_dir(start) {
            Some(dir) => {
                let manifest = Self::from_dir(&dir)?;
                Ok(Some((dir, manifest)))
            }
            None => Ok(None),
        }
    }
}
