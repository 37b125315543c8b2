//! Rigging core - on-demand command artifacts
//!
//! This crate turns a command name into running code pulled from a
//! package registry. Every subcommand of the `rig` CLI is a separately
//! published artifact that is resolved, cached, installed or updated on
//! demand, and then loaded and invoked.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (command name -> artifact name)
//!     │
//!     ▼
//! Artifact (name, version spec, target path, store dir)
//!     │
//!     ├── version    ← picks a concrete version from the registry listing
//!     ├── cache      ← store_dir/_<prefix>@<version>@<name>
//!     ├── registry   ← artifact metadata (versions, tarballs)
//!     └── installer  ← download, verify, extract into the cache
//!            │
//!            ▼
//!     manifest (package.json "main") → entry point
//!            │
//!            ▼
//!     loader → invoke with the original arguments
//! ```

pub mod artifact;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod installer;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod settings;
pub mod version;

pub use artifact::{Artifact, ArtifactOptions, UpdateOutcome, VersionSpec, VersionState};
pub use dispatch::{CommandMetadata, CommandTable, Dispatcher, Invocation};
pub use error::{DispatchError, Result};
pub use installer::{InstallRequest, InstallStrategy, Installer, TarballInstaller};
pub use loader::{Invocable, ModuleLoader, ProcessLoader};
pub use manifest::PackageManifest;
pub use registry::{ArtifactMetadata, HttpRegistry, RegistryClient};
pub use settings::Settings;
