//! Cordon sandbox - run untrusted commands under host isolation runtimes
//!
//! Turns a [`SandboxConfig`] plus an [`ExecutionRequest`] into an invocation of
//! an external isolation tool (gVisor `runsc`, `nsjail` or Docker), supervises
//! it under a deadline and an output cap, and reports an [`ExecutionResult`].
//!
//! ```no_run
//! use cordon_sandbox::{BackendSelector, EngineConfig, ExecutionRequest, SandboxAdapter, SandboxConfig};
//!
//! # async fn demo() -> cordon_sandbox::Result<()> {
//! let engine = EngineConfig::load(None)?;
//! let selector = BackendSelector::detect(&engine).await;
//! let mut sandbox = selector.create(SandboxConfig::default(), &engine)?;
//!
//! let result = sandbox.execute(ExecutionRequest::new("echo").arg("hello")).await;
//! assert!(result.success);
//! sandbox.cleanup().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detect;
mod error;
mod execution;
pub mod limits;
pub mod policy;
pub mod runtime;
pub mod seccomp;
mod selector;
mod sink;
pub mod supervisor;
mod types;
mod workspace;

pub use config::{EngineConfig, FilesystemConfig, NetworkConfig, NetworkMode, SandboxConfig};
pub use detect::{detect_runtimes, HostOs, Prober, RuntimeDetector};
pub use error::{Result, SandboxError};
pub use execution::{ExecutionPhase, InstanceId};
pub use limits::parse_memory;
pub use policy::NsjailPolicy;
pub use runtime::{
    Backend, DockerSandbox, Driver, GvisorSandbox, InstanceContext, NsjailSandbox, ProcessSandbox,
    Sandbox, SandboxAdapter,
};
pub use selector::{create_adapter, BackendDecision, BackendSelector};
pub use sink::BoundedSink;
pub use types::{ExecutionRequest, ExecutionResult, Outcome, ResourceUsage, SandboxRuntime, NO_EXIT_CODE};
pub use workspace::Workspace;
