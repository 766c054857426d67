use crate::runtime::Backend;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised outside of `execute`.
///
/// Execution itself never fails with one of these; spawn failures, timeouts
/// and signals are all reported through [`crate::ExecutionResult`].
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Invalid memory limit '{0}': expected <digits>[Ki|Mi|Gi]")]
    InvalidMemory(String),

    #[error("Invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to manage sandbox workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to write policy file {path}: {source}")]
    Policy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend '{0}' is not available on this host")]
    Unavailable(Backend),

    #[error("No usable sandbox backend detected")]
    NoBackend,

    #[error("Failed to load config {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
