//! Backend adapter contract and the shared sandbox lifecycle

pub mod docker;
pub mod gvisor;
pub mod nsjail;
mod process;

use crate::config::{NetworkMode, SandboxConfig};
use crate::detect::RuntimeDetector;
use crate::error::{Result, SandboxError};
use crate::execution::InstanceId;
use crate::supervisor::{supervise, Invocation, Limits};
use crate::types::{ExecutionRequest, ExecutionResult};
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use docker::DockerDriver;
pub use gvisor::GvisorDriver;
pub use nsjail::NsjailDriver;
pub use process::ProcessDriver;

/// Bound on backend-side cleanup commands such as `docker kill`
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Host isolation technology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// gVisor user-space kernel (`runsc`)
    Gvisor,
    /// Namespaces plus a seccomp allow-list (`nsjail`)
    Nsjail,
    /// Ephemeral Docker container
    Docker,
    /// macOS Seatbelt profiles; detected only, no adapter
    SandboxExec,
    /// Direct child process with no isolation
    Process,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Gvisor,
        Backend::Nsjail,
        Backend::Docker,
        Backend::SandboxExec,
        Backend::Process,
    ];

    /// Isolation ranking (lower is stronger)
    pub fn isolation_rank(self) -> u8 {
        match self {
            Backend::Gvisor => 0,
            Backend::Nsjail => 1,
            Backend::Docker => 2,
            Backend::SandboxExec => 3,
            Backend::Process => 4,
        }
    }

    /// Whether this crate can execute commands through the backend
    pub fn has_adapter(self) -> bool {
        self != Backend::SandboxExec
    }

    pub fn is_sandboxed(self) -> bool {
        self != Backend::Process
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Gvisor => "gvisor",
            Backend::Nsjail => "nsjail",
            Backend::Docker => "docker",
            Backend::SandboxExec => "sandbox-exec",
            Backend::Process => "process",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        Backend::ALL
            .into_iter()
            .find(|backend| backend.as_str() == s)
            .ok_or_else(|| SandboxError::InvalidConfig(format!("unknown backend '{}'", s)))
    }
}

/// What a driver sees of the instance it serves
#[derive(Debug, Clone, Copy)]
pub struct InstanceContext<'a> {
    pub id: InstanceId,
    pub config: &'a SandboxConfig,
    pub workspace: Option<&'a Workspace>,
}

impl InstanceContext<'_> {
    /// Request override first, then the config default
    pub fn work_dir<'r>(&'r self, request: &'r ExecutionRequest) -> Option<&'r Path> {
        request
            .work_dir
            .as_deref()
            .or(self.config.filesystem.work_dir.as_deref())
    }
}

/// Backend-specific half of a sandbox: turns config and request into an
/// external-process invocation. One method per lifecycle step.
#[async_trait]
pub trait Driver: Send + Sync {
    const BACKEND: Backend;

    /// Whether the instance needs a temp directory
    fn needs_workspace(&self) -> bool {
        true
    }

    /// External launcher this driver spawns, if any
    fn binary(&self) -> Option<&Path> {
        None
    }

    /// Called once per instance after the workspace exists.
    async fn prepare(&self, _ctx: InstanceContext<'_>) -> Result<()> {
        Ok(())
    }

    fn invocation(&self, ctx: InstanceContext<'_>, request: &ExecutionRequest) -> Invocation;

    /// Backend-side cleanup after the launcher was killed on timeout.
    async fn terminate(&self, _ctx: InstanceContext<'_>) {}
}

/// Lifecycle every backend exposes upward.
///
/// Methods take `&mut self`: one instance runs one execution at a time.
/// Run several instances to execute concurrently.
#[async_trait]
pub trait SandboxAdapter: Send {
    fn backend(&self) -> Backend;

    fn instance_id(&self) -> InstanceId;

    /// Allocate temp state. Idempotent.
    async fn initialize(&mut self) -> Result<()>;

    /// Run one request. Never fails; see [`ExecutionResult`].
    async fn execute(&mut self, request: ExecutionRequest) -> ExecutionResult;

    /// Remove what `initialize` created. A no-op when nothing exists.
    async fn cleanup(&mut self) -> Result<()>;
}

/// A sandbox instance: immutable config, a driver and lazily created state
pub struct Sandbox<D: Driver> {
    id: InstanceId,
    config: SandboxConfig,
    driver: D,
    workspace: Option<Workspace>,
    initialized: bool,
}

pub type GvisorSandbox = Sandbox<GvisorDriver>;
pub type NsjailSandbox = Sandbox<NsjailDriver>;
pub type DockerSandbox = Sandbox<DockerDriver>;
pub type ProcessSandbox = Sandbox<ProcessDriver>;

impl<D: Driver> Sandbox<D> {
    /// Validate `config` and build an uninitialized instance.
    pub fn new(config: SandboxConfig, driver: D) -> Result<Self> {
        config.validate()?;

        if config.network.mode == NetworkMode::Restricted && !config.network.allowed_hosts.is_empty() {
            tracing::warn!(
                backend = %D::BACKEND,
                hosts = ?config.network.allowed_hosts,
                "Host allow-list is not enforced by this backend"
            );
        }

        Ok(Self {
            id: InstanceId::new(),
            config,
            driver,
            workspace: None,
            initialized: false,
        })
    }

    /// Probe whether the driver's launcher works on this host.
    pub async fn is_available(&self) -> bool {
        let mut detector = RuntimeDetector::new();
        if let Some(binary) = self.driver.binary() {
            detector = detector.with_binary(D::BACKEND, binary);
        }
        detector.probe(D::BACKEND).await.available
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Temp directory, once initialized
    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace.as_ref().map(Workspace::path)
    }

    /// The invocation `execute` would spawn for `request`.
    pub fn invocation(&self, request: &ExecutionRequest) -> Invocation {
        self.driver.invocation(self.context(), request)
    }

    fn context(&self) -> InstanceContext<'_> {
        InstanceContext {
            id: self.id,
            config: &self.config,
            workspace: self.workspace.as_ref(),
        }
    }

    fn limits(&self) -> Limits {
        Limits {
            timeout: self.config.timeout,
            max_output_bytes: self.config.max_output_bytes,
        }
    }
}

#[async_trait]
impl<D: Driver> SandboxAdapter for Sandbox<D> {
    fn backend(&self) -> Backend {
        D::BACKEND
    }

    fn instance_id(&self) -> InstanceId {
        self.id
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        if self.driver.needs_workspace() {
            self.workspace = Some(Workspace::create(self.id).await?);
        }

        let prepared = self.driver.prepare(self.context()).await;
        if let Err(e) = prepared {
            if let Some(workspace) = self.workspace.take() {
                if let Err(cleanup_err) = workspace.remove().await {
                    tracing::warn!(instance = %self.id, error = %cleanup_err, "Failed to remove workspace");
                }
            }
            return Err(e);
        }

        self.initialized = true;
        tracing::info!(instance = %self.id, backend = %D::BACKEND, "Sandbox initialized");
        Ok(())
    }

    async fn execute(&mut self, request: ExecutionRequest) -> ExecutionResult {
        if let Err(e) = self.initialize().await {
            tracing::error!(instance = %self.id, backend = %D::BACKEND, error = %e, "Sandbox initialization failed");
            return ExecutionResult::spawn_failed(format!("Sandbox initialization failed: {}", e), 0);
        }

        tracing::info!(
            instance = %self.id,
            backend = %D::BACKEND,
            command = %request.command,
            args = request.args.len(),
            "Executing command"
        );

        let invocation = self.driver.invocation(self.context(), &request);
        let result = supervise(self.id, &invocation, self.limits()).await;

        if result.timed_out {
            self.driver.terminate(self.context()).await;
        }

        result
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.initialized = false;
        if let Some(workspace) = self.workspace.take() {
            workspace.remove().await?;
            tracing::info!(instance = %self.id, backend = %D::BACKEND, "Sandbox cleaned up");
        }
        Ok(())
    }
}

/// Run a backend management command, logging instead of failing.
pub(crate) async fn run_best_effort(program: &Path, args: &[String]) {
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(TERMINATE_TIMEOUT, command.status()).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => {
            tracing::debug!(program = %program.display(), ?args, %status, "Cleanup command failed")
        }
        Ok(Err(e)) => {
            tracing::warn!(program = %program.display(), error = %e, "Cleanup command could not start")
        }
        Err(_) => tracing::warn!(program = %program.display(), "Cleanup command timed out"),
    }
}

/// Names of the request's environment variables, sorted.
///
/// Values reach the sandbox through the launcher's environment so they never
/// show up in the process list.
pub(crate) fn env_names(request: &ExecutionRequest) -> impl Iterator<Item = &str> {
    request.env.keys().map(String::as_str)
}

pub(crate) fn path_string(path: &Path) -> String {
    path.display().to_string()
}
