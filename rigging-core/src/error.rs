//! Dispatch error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Boxed source error carried by failures that wrap foreign error types
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

/// Errors raised while resolving, installing or running a command artifact
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Artifact options were missing a required field or held an unparseable value
    #[error("Invalid artifact configuration: {0}")]
    InvalidConfiguration(String),

    /// The registry could not be reached or answered with an error
    #[error("Registry lookup failed for '{name}': {reason}")]
    Registry { name: String, reason: String },

    /// The registry listed the same version more than once
    #[error("Registry returned version {version} of '{name}' more than once")]
    RegistryIntegrity { name: String, version: String },

    /// Nothing satisfying the request has been published
    #[error("No published version of '{name}' satisfies '{spec}'")]
    NoPublishedVersions { name: String, spec: String },

    /// The installer reported an error; partial writes are not rolled back
    #[error("Failed to install {name}@{version}")]
    InstallFailure {
        name: String,
        version: String,
        #[source]
        source: BoxError,
    },

    /// No manifest, or no declared entry, beneath the artifact root
    #[error("No entry point found for artifact rooted at {}", root.display())]
    EntryPointNotFound { root: PathBuf },

    /// The entry file was found but could not be loaded
    #[error("Failed to load module {}: {reason}", path.display())]
    ModuleLoad { path: PathBuf, reason: String },

    /// The command name has no registered artifact
    #[error("Unknown command '{command}'. Available commands: {}", available.join(", "))]
    UnknownCommand {
        command: String,
        available: Vec<String>,
    },

    /// A manifest exists but could not be read or parsed
    #[error("Failed to read manifest {}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The artifact ran and exited unsuccessfully
    #[error("Command '{command}' exited with {}", code.map(|c| format!("status {c}")).unwrap_or_else(|| "a signal".to_string()))]
    CommandFailed { command: String, code: Option<i32> },

    /// Filesystem failure outside the installer
    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DispatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DispatchError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn install(
        name: impl Into<String>,
        version: impl ToString,
        source: impl Into<BoxError>,
    ) -> Self {
        DispatchError::InstallFailure {
            name: name.into(),
            version: version.to_string(),
            source: source.into(),
        }
    }

    /// Follow-up advice printed by the CLI beneath the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            DispatchError::Registry { .. } => {
                Some("Check your network connection or point RIG_REGISTRY at a reachable registry.")
            }
            DispatchError::InstallFailure { .. } => Some(
                "The cache entry may be incomplete. Remove it from the dependencies directory and retry.",
            ),
            DispatchError::EntryPointNotFound { .. } => {
                Some("The artifact's package.json must declare a \"main\" entry.")
            }
            DispatchError::UnknownCommand { .. } => {
                Some("Register the command under `commands:` in config.yaml.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_lists_available() {
        let err = DispatchError::UnknownCommand {
            command: "deploy".to_string(),
            available: vec!["init".to_string(), "publish".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown command 'deploy'. Available commands: init, publish"
        );
    }

    #[test]
    fn test_install_failure_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = DispatchError::install("demo-cmd", "1.0.0", io);

        assert_eq!(err.to_string(), "Failed to install demo-cmd@1.0.0");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk full");
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_command_failed_message() {
        let err = DispatchError::CommandFailed {
            command: "init".to_string(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "Command 'init' exited with status 2");

        let err = DispatchError::CommandFailed {
            command: "init".to_string(),
            code: None,
        };
        assert_eq!(err.to_string(), "Command 'init' exited with a signal");
    }
}
