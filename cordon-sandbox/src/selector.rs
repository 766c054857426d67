//! Backend selection by isolation strength

use crate::config::{EngineConfig, SandboxConfig};
use crate::detect::RuntimeDetector;
use crate::error::{Result, SandboxError};
use crate::runtime::{
    Backend, DockerDriver, GvisorDriver, NsjailDriver, ProcessDriver, Sandbox, SandboxAdapter,
};
use crate::types::SandboxRuntime;

/// Outcome of a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDecision {
    pub backend: Backend,

    /// Whether the backend came from an explicit preference
    pub preferred: bool,

    pub reason: String,
}

/// Picks a backend from detected runtimes and builds adapters for it
#[derive(Debug, Clone)]
pub struct BackendSelector {
    runtimes: Vec<SandboxRuntime>,
    preferred: Option<Backend>,
    allow_unsandboxed: bool,
}

impl BackendSelector {
    pub fn new(runtimes: Vec<SandboxRuntime>) -> Self {
        Self {
            runtimes,
            preferred: None,
            allow_unsandboxed: false,
        }
    }

    /// Detect the host's runtimes using the engine's probe timeout and
    /// configured runtime binaries.
    pub async fn detect(engine: &EngineConfig) -> Self {
        let runtimes = RuntimeDetector::configured(engine).detect().await;
        Self::new(runtimes).configured(engine)
    }

    /// Apply preference and unsandboxed policy from `engine`.
    pub fn configured(mut self, engine: &EngineConfig) -> Self {
        self.preferred = engine.backend;
        self.allow_unsandboxed = engine.allow_unsandboxed;
        self
    }

    pub fn prefer(mut self, backend: Backend) -> Self {
        self.preferred = Some(backend);
        self
    }

    pub fn allow_unsandboxed(mut self, allow: bool) -> Self {
        self.allow_unsandboxed = allow;
        self
    }

    pub fn runtimes(&self) -> &[SandboxRuntime] {
        &self.runtimes
    }

    fn is_available(&self, backend: Backend) -> bool {
        self.runtimes
            .iter()
            .any(|runtime| runtime.backend == backend && runtime.available)
    }

    fn is_permitted(&self, backend: Backend) -> bool {
        backend.has_adapter() && (backend.is_sandboxed() || self.allow_unsandboxed)
    }

    /// Choose a backend.
    ///
    /// An explicit preference is honored or rejected, never downgraded.
    /// Otherwise the strongest available backend wins.
    pub fn select(&self) -> Result<BackendDecision> {
        if let Some(backend) = self.preferred {
            if !backend.has_adapter() {
                return Err(SandboxError::InvalidConfig(format!(
                    "backend '{}' can be detected but not used for execution",
                    backend
                )));
            }
            if !self.is_permitted(backend) {
                return Err(SandboxError::InvalidConfig(format!(
                    "backend '{}' requires allow_unsandboxed",
                    backend
                )));
            }
            if !self.is_available(backend) {
                return Err(SandboxError::Unavailable(backend));
            }
            return Ok(BackendDecision {
                backend,
                preferred: true,
                reason: format!("Preferred backend {} is available", backend),
            });
        }

        let mut candidates: Vec<Backend> = self
            .runtimes
            .iter()
            .filter(|runtime| runtime.available && self.is_permitted(runtime.backend))
            .map(|runtime| runtime.backend)
            .collect();
        candidates.sort_by_key(|backend| backend.isolation_rank());

        let backend = *candidates.first().ok_or(SandboxError::NoBackend)?;
        let reason = if backend.is_sandboxed() {
            format!("Selected strongest available backend {}", backend)
        } else {
            "No sandbox runtime available, running unsandboxed".to_string()
        };

        tracing::info!(%backend, candidates = ?candidates, "Backend selected");
        Ok(BackendDecision {
            backend,
            preferred: false,
            reason,
        })
    }

    /// Select a backend and build an adapter for `config`.
    pub fn create(&self, config: SandboxConfig, engine: &EngineConfig) -> Result<Box<dyn SandboxAdapter>> {
        let decision = self.select()?;
        tracing::debug!(backend = %decision.backend, reason = %decision.reason, "Creating sandbox");
        create_adapter(decision.backend, config, engine)
    }
}

/// Build an adapter for a specific backend without probing the host.
pub fn create_adapter(
    backend: Backend,
    config: SandboxConfig,
    engine: &EngineConfig,
) -> Result<Box<dyn SandboxAdapter>> {
    let adapter: Box<dyn SandboxAdapter> = match backend {
        Backend::Gvisor => Box::new(Sandbox::new(config, GvisorDriver::new(engine.gvisor.clone()))?),
        Backend::Nsjail => Box::new(Sandbox::new(config, NsjailDriver::new(engine.nsjail.clone()))?),
        Backend::Docker => Box::new(Sandbox::new(config, DockerDriver::new(engine.docker.clone()))?),
        Backend::Process => Box::new(Sandbox::new(config, ProcessDriver)?),
        Backend::SandboxExec => {
            return Err(SandboxError::InvalidConfig(format!(
                "no execution adapter for backend '{}'",
                backend
            )))
        }
    };
    Ok(adapter)
}
