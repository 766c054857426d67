//! Host runtime detection
//!
//! Every backend has a static [`ProbeSpec`]: the binary to look for, how to
//! check it, and the host operating systems it runs on. The platform table is
//! consulted before anything is spawned, so Linux-only backends on macOS cost
//! nothing. The table's binary name is only a default: a detector built
//! with [`RuntimeDetector::configured`] probes the binaries the adapters will
//! actually run. Detection is read-only but spawns one process per backend;
//! callers should hold on to the result.

use crate::config::EngineConfig;
use crate::runtime::Backend;
use crate::types::SandboxRuntime;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinSet;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            HostOs::Linux
        } else if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else if cfg!(target_os = "windows") {
            HostOs::Windows
        } else {
            HostOs::Other
        }
    }
}

/// How availability is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Run the binary with these arguments; exit status 0 means available.
    Command(&'static [&'static str]),
    /// Available when the binary resolves on `PATH`.
    OnPath,
    /// Always available; nothing to check.
    Builtin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSpec {
    pub backend: Backend,

    /// Default binary name, looked up on `PATH`
    pub binary: &'static str,
    pub kind: ProbeKind,
    pub platforms: &'static [HostOs],
}

impl ProbeSpec {
    pub fn supports(&self, os: HostOs) -> bool {
        self.platforms.contains(&os)
    }
}

const LINUX: &[HostOs] = &[HostOs::Linux];
const MACOS: &[HostOs] = &[HostOs::MacOs];
const DESKTOP: &[HostOs] = &[HostOs::Linux, HostOs::MacOs, HostOs::Windows];
const ANY: &[HostOs] = &[HostOs::Linux, HostOs::MacOs, HostOs::Windows, HostOs::Other];

/// One entry per [`Backend`], in [`Backend::ALL`] order
pub const PROBES: &[ProbeSpec] = &[
    ProbeSpec {
        backend: Backend::Gvisor,
        binary: "runsc",
        kind: ProbeKind::Command(&["--version"]),
        platforms: LINUX,
    },
    ProbeSpec {
        backend: Backend::Nsjail,
        binary: "nsjail",
        kind: ProbeKind::OnPath,
        platforms: LINUX,
    },
    ProbeSpec {
        backend: Backend::Docker,
        binary: "docker",
        kind: ProbeKind::Command(&["version", "--format", "{{.Server.Version}}"]),
        platforms: DESKTOP,
    },
    ProbeSpec {
        backend: Backend::SandboxExec,
        binary: "sandbox-exec",
        kind: ProbeKind::OnPath,
        platforms: MACOS,
    },
    ProbeSpec {
        backend: Backend::Process,
        binary: "",
        kind: ProbeKind::Builtin,
        platforms: ANY,
    },
];

pub fn probe_spec(backend: Backend) -> &'static ProbeSpec {
    &PROBES[backend as usize]
}

/// Result of one check: raw version text on success, a reason otherwise.
pub type ProbeOutcome = std::result::Result<Option<String>, String>;

/// Runs the host-side half of a probe against `binary`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, spec: &ProbeSpec, binary: &Path, timeout: Duration) -> ProbeOutcome;
}

/// Spawns real probe processes
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProber;

#[async_trait]
impl Prober for CommandProber {
    async fn check(&self, spec: &ProbeSpec, binary: &Path, timeout: Duration) -> ProbeOutcome {
        let name = binary.display();
        match spec.kind {
            ProbeKind::Builtin => Ok(None),
            ProbeKind::OnPath => which::which(binary)
                .map(|_| None)
                .map_err(|_| format!("{} not found on PATH", name)),
            ProbeKind::Command(args) => {
                let mut command = tokio::process::Command::new(binary);
                command
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);

                let output = match tokio::time::timeout(timeout, command.output()).await {
                    Err(_) => return Err(format!("{} probe timed out after {:?}", name, timeout)),
                    Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(format!("{} not found", name))
                    }
                    Ok(Err(e)) => return Err(format!("{} could not start: {}", name, e)),
                    Ok(Ok(output)) => output,
                };

                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if output.status.success() {
                    let text = if stdout.trim().is_empty() { stderr } else { stdout };
                    Ok(Some(text.into_owned()))
                } else {
                    let detail = first_line(&stderr).unwrap_or_else(|| output.status.to_string());
                    Err(format!("{} probe failed: {}", name, detail))
                }
            }
        }
    }
}

/// Probes backends on the current host.
#[derive(Clone)]
pub struct RuntimeDetector {
    prober: Arc<dyn Prober>,
    timeout: Duration,
    host: HostOs,
    binaries: HashMap<Backend, PathBuf>,
}

impl Default for RuntimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeDetector {
    pub fn new() -> Self {
        Self {
            prober: Arc::new(CommandProber),
            timeout: DEFAULT_PROBE_TIMEOUT,
            host: HostOs::current(),
            binaries: HashMap::new(),
        }
    }

    /// Probe with the engine's timeout and the binaries its adapters run.
    pub fn configured(engine: &EngineConfig) -> Self {
        Self::new()
            .with_timeout(engine.probe_timeout)
            .with_binary(Backend::Gvisor, engine.gvisor.binary.clone())
            .with_binary(Backend::Nsjail, engine.nsjail.binary.clone())
            .with_binary(Backend::Docker, engine.docker.binary.clone())
    }

    /// Probe `binary` instead of the table's default for `backend`.
    pub fn with_binary(mut self, backend: Backend, binary: impl Into<PathBuf>) -> Self {
        self.binaries.insert(backend, binary.into());
        self
    }

    /// Binary a probe of `backend` checks
    pub fn binary(&self, backend: Backend) -> &Path {
        self.binaries
            .get(&backend)
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(probe_spec(backend).binary))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pretend to run on `host`.
    pub fn with_host(mut self, host: HostOs) -> Self {
        self.host = host;
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    /// Check one backend. Never fails; problems become `available: false`.
    pub async fn probe(&self, backend: Backend) -> SandboxRuntime {
        let spec = probe_spec(backend);

        if !spec.supports(self.host) {
            tracing::debug!(%backend, host = ?self.host, "Backend not supported on this host");
            return SandboxRuntime::unavailable(backend, format!("not supported on {:?}", self.host));
        }

        if spec.kind == ProbeKind::Builtin {
            return SandboxRuntime::available(backend, None);
        }

        match self.prober.check(spec, self.binary(backend), self.timeout).await {
            Ok(raw) => {
                let version = raw.as_deref().and_then(extract_version);
                tracing::debug!(%backend, ?version, "Backend available");
                SandboxRuntime::available(backend, version)
            }
            Err(reason) => {
                tracing::debug!(%backend, %reason, "Backend unavailable");
                SandboxRuntime::unavailable(backend, reason)
            }
        }
    }

    /// Check every backend concurrently, returned in [`Backend::ALL`] order.
    pub async fn detect(&self) -> Vec<SandboxRuntime> {
        let mut tasks = JoinSet::new();
        for backend in Backend::ALL {
            let detector = self.clone();
            tasks.spawn(async move { detector.probe(backend).await });
        }

        let mut runtimes = Vec::with_capacity(Backend::ALL.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(runtime) => runtimes.push(runtime),
                Err(e) => tracing::warn!(error = %e, "Probe task failed"),
            }
        }
        runtimes.sort_by_key(|runtime| runtime.backend);

        let available = runtimes.iter().filter(|r| r.available).count();
        tracing::info!(available, total = runtimes.len(), "Runtime detection finished");
        runtimes
    }
}

/// Detect every backend on this host with default probes.
pub async fn detect_runtimes() -> Vec<SandboxRuntime> {
    RuntimeDetector::new().detect().await
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)+").expect("static regex"))
}

/// Dotted version number from probe output, else its first line.
fn extract_version(raw: &str) -> Option<String> {
    version_regex()
        .find(raw)
        .map(|m| m.as_str().to_string())
        .or_else(|| first_line(raw))
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
