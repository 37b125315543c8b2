//! Module loading - the one place runtime-chosen code is executed
//!
//! The dispatcher only sees the [`ModuleLoader`] and [`Invocable`] traits,
//! so tests can substitute a recording loader.
//! [`ProcessLoader`] runs an artifact's entry file as a child process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

use crate::dispatch::Invocation;
use crate::error::{DispatchError, Result};

/// Environment variable carrying the command metadata as JSON
pub const COMMAND_ENV: &str = "RIG_COMMAND";

/// A loaded artifact entry that can be run
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Run the artifact with the caller's arguments and command metadata
    async fn invoke(&self, invocation: &Invocation) -> Result<()>;
}

/// Loads the module at a resolved entry path
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load `entry`, failing with [`DispatchError::ModuleLoad`] if it is
    /// missing or cannot be run
    async fn load(&self, entry: &Path) -> Result<Box<dyn Invocable>>;
}

/// Loader that runs entry files as child processes
///
/// The interpreter is chosen from the file extension. Files with an
/// unknown extension are executed directly.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    interpreters: HashMap<String, String>,
}

impl Default for ProcessLoader {
    fn default() -> Self {
        let interpreters = [
            ("js", "node"),
            ("cjs", "node"),
            ("mjs", "node"),
            ("py", "python3"),
            ("sh", "sh"),
        ]
        .into_iter()
        .map(|(ext, program)| (ext.to_string(), program.to_string()))
        .collect();

        Self { interpreters }
    }
}

impl ProcessLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run files ending in `.{extension}` with `program`
    pub fn with_interpreter(mut self, extension: &str, program: impl Into<String>) -> Self {
        self.interpreters
            .insert(extension.trim_start_matches('.').to_string(), program.into());
        self
    }

    /// Interpreter for `entry`, or `None` when it is run directly
    pub fn interpreter_for(&self, entry: &Path) -> Option<&str> {
        entry
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.interpreters.get(ext))
            .map(String::as_str)
    }
}

#[async_trait]
impl ModuleLoader for ProcessLoader {
    async fn load(&self, entry: &Path) -> Result<Box<dyn Invocable>> {
        let metadata = tokio::fs::metadata(entry)
            .await
            .map_err(|e| DispatchError::ModuleLoad {
                path: entry.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !metadata.is_file() {
            return Err(DispatchError::ModuleLoad {
                path: entry.to_path_buf(),
                reason: "entry is not a file".to_string(),
            });
        }

        let program = self.interpreter_for(entry).map(str::to_string);
        debug!(
            "Loaded {} (interpreter: {})",
            entry.display(),
            program.as_deref().unwrap_or("none")
        );

        Ok(Box::new(ProcessModule {
            entry: entry.to_path_buf(),
            program,
        }))
    }
}

/// An entry file ready to be spawned
struct ProcessModule {
    entry: PathBuf,
    program: Option<String>,
}

#[async_trait]
impl Invocable for ProcessModule {
    async fn invoke(&self, invocation: &Invocation) -> Result<()> {
        let command_json =
            serde_json::to_string(&invocation.command).map_err(|e| DispatchError::ModuleLoad {
                path: self.entry.clone(),
                reason: format!("failed to encode command metadata: {e}"),
            })?;

        let mut command = match &self.program {
            Some(program) => {
                let mut command = tokio::process::Command::new(program);
                command.arg(&self.entry);
                command
            }
            None => tokio::process::Command::new(&self.entry),
        };

        command
            .args(&invocation.args)
            .env(COMMAND_ENV, command_json)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        info!("Running {}", self.entry.display());
        let status = command
            .status()
            .await
            .map_err(|e| DispatchError::ModuleLoad {
                path: self.entry.clone(),
                reason: format!("failed to start: {e}"),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(DispatchError::CommandFailed {
                command: invocation.command.name.clone(),
                code: status.code(),
            })
        }
    }
}
