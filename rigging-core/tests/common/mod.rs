//! Test helpers shared across integration tests
//!
//! In-memory stand-ins for the registry, installer and module loader so
//! the dispatch flow can be exercised without network access or child
//! processes.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use rigging_core::registry::ArtifactMetadata;
use rigging_core::{
    DispatchError, InstallRequest, Installer, Invocable, Invocation, ModuleLoader,
    RegistryClient,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Registry whose published versions can change between calls
#[derive(Default)]
pub struct FakeRegistry {
    versions: Mutex<Vec<String>>,
    lookups: AtomicUsize,
    unavailable: bool,
}

impl FakeRegistry {
    pub fn new(versions: &[&str]) -> Arc<Self> {
        let registry = Self::default();
        registry.publish(versions);
        Arc::new(registry)
    }

    /// Registry that answers every lookup with a server error
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            unavailable: true,
            ..Self::default()
        })
    }

    pub fn publish(&self, versions: &[&str]) {
        let mut published = self.versions.lock().unwrap();
        published.extend(versions.iter().map(|v| v.to_string()));
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn fetch_metadata(
        &self,
        name: &str,
    ) -> rigging_core::Result<Option<ArtifactMetadata>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(DispatchError::Registry {
                name: name.to_string(),
                reason: "HTTP 503 Service Unavailable".to_string(),
            });
        }

        let mut metadata = ArtifactMetadata {
            name: name.to_string(),
            ..Default::default()
        };
        for version in self.versions.lock().unwrap().iter() {
            metadata.versions.insert(version.clone(), Default::default());
        }
        Ok(Some(metadata))
    }

    fn url(&self) -> &str {
        "https://registry.test"
    }
}

/// Installer that writes a minimal artifact and records each request
#[derive(Default)]
pub struct FakeInstaller {
    requests: Mutex<Vec<InstallRequest>>,
    fail: bool,
}

impl FakeInstaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn installed(&self) -> Vec<(String, String)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.name.clone(), r.version.clone()))
            .collect()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn materialize(&self, request: &InstallRequest) -> rigging_core::Result<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());

        if self.fail {
            return Err(DispatchError::Registry {
                name: request.name.clone(),
                reason: "HTTP 500".to_string(),
            });
        }

        write_artifact(&request.destination, &request.name, &request.version, Some("lib/index.js"))
            .map_err(|e| DispatchError::Registry {
                name: request.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(request.destination.clone())
    }
}

/// Lay out an artifact directory with a manifest and its entry file
pub fn write_artifact(dir: &Path, name: &str, version: &str, main: Option<&str>) -> Result<()> {
    fs::create_dir_all(dir)?;

    let manifest = match main {
        Some(main) => serde_json::json!({"name": name, "version": version, "main": main}),
        None => serde_json::json!({"name": name, "version": version}),
    };
    fs::write(dir.join("package.json"), serde_json::to_string_pretty(&manifest)?)?;

    if let Some(main) = main {
        let entry = dir.join(main);
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(entry, format!("// {name}@{version}\n"))?;
    }

    Ok(())
}

/// Loader that records what it loaded and what was invoked
#[derive(Default)]
pub struct RecordingLoader {
    pub loaded: Arc<Mutex<Vec<PathBuf>>>,
    pub invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl RecordingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn loaded(&self) -> Vec<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

struct RecordingModule {
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

#[async_trait]
impl Invocable for RecordingModule {
    async fn invoke(&self, invocation: &Invocation) -> rigging_core::Result<()> {
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(())
    }
}

#[async_trait]
impl ModuleLoader for RecordingLoader {
    async fn load(&self, entry: &Path) -> rigging_core::Result<Box<dyn Invocable>> {
        if !entry.is_file() {
            return Err(DispatchError::ModuleLoad {
                path: entry.to_path_buf(),
                reason: "entry file does not exist".to_string(),
            });
        }

        self.loaded.lock().unwrap().push(entry.to_path_buf());
        Ok(Box::new(RecordingModule {
            invocations: self.invocations.clone(),
        }))
    }
}
