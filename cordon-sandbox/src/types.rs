//! Core types for sandbox execution

use crate::runtime::Backend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Exit code reported when the process produced none.
pub const NO_EXIT_CODE: i32 = -1;

/// One command to run inside a sandbox instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Program to execute
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides passed through to the sandboxed process
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Written to stdin in one shot, then the stream is closed
    pub stdin: Option<Vec<u8>>,

    /// Overrides the config's working directory for this call only
    pub work_dir: Option<PathBuf>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The process exited on its own
    Completed { exit_code: i32 },

    /// The deadline fired and the supervisor killed the process
    TimedOut,

    /// The process died from a signal the supervisor did not send
    Signaled { signal: i32 },

    /// The process could not be started
    SpawnFailed { error: String },
}

/// I/O observed from the process, counted before truncation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
}

/// Result of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Exit code, or [`NO_EXIT_CODE`] when there is none
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,

    pub timed_out: bool,

    /// Terminated by a signal not attributable to the timeout path
    pub killed: bool,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    pub resource_usage: Option<ResourceUsage>,

    /// Spawn-level error message
    pub error: Option<String>,

    pub outcome: Outcome,
}

impl ExecutionResult {
    /// Result for an execution that never got a process.
    pub fn spawn_failed(error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        Self {
            success: false,
            exit_code: NO_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            timed_out: false,
            killed: false,
            duration_ms,
            resource_usage: None,
            error: Some(error.clone()),
            outcome: Outcome::SpawnFailed { error },
        }
    }
}

/// Host availability of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRuntime {
    pub backend: Backend,
    pub name: String,
    pub available: bool,
    pub version: Option<String>,

    /// Why the backend is unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SandboxRuntime {
    pub fn available(backend: Backend, version: Option<String>) -> Self {
        Self {
            backend,
            name: backend.to_string(),
            available: true,
            version,
            reason: None,
        }
    }

    pub fn unavailable(backend: Backend, reason: impl Into<String>) -> Self {
        Self {
            backend,
            name: backend.to_string(),
            available: false,
            version: None,
            reason: Some(reason.into()),
        }
    }
}
