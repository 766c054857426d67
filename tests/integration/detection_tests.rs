//! Runtime detection with scripted probes

use crate::common::setup_test_logging;
use async_trait::async_trait;
use cordon_sandbox::detect::{ProbeOutcome, ProbeSpec};
use cordon_sandbox::runtime::gvisor::GvisorOptions;
use cordon_sandbox::runtime::GvisorDriver;
use cordon_sandbox::{
    Backend, BackendSelector, EngineConfig, HostOs, Prober, RuntimeDetector, Sandbox,
    SandboxConfig, SandboxError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers probes from a fixed table and records what was asked.
#[derive(Default)]
struct ScriptedProber {
    installed: Vec<(Backend, &'static str)>,
    asked: Mutex<Vec<(Backend, PathBuf)>>,
}

impl ScriptedProber {
    fn with(mut self, backend: Backend, output: &'static str) -> Self {
        self.installed.push((backend, output));
        self
    }

    fn asked_backends(&self) -> Vec<Backend> {
        self.asked.lock().unwrap().iter().map(|(backend, _)| *backend).collect()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check(&self, spec: &ProbeSpec, binary: &Path, _timeout: Duration) -> ProbeOutcome {
        self.asked.lock().unwrap().push((spec.backend, binary.to_path_buf()));
        match self.installed.iter().find(|(backend, _)| *backend == spec.backend) {
            Some((_, output)) => Ok(Some(output.to_string())),
            None => Err(format!("{} not found", binary.display())),
        }
    }
}

/// Never answers within the probe timeout.
struct HangingProber {
    calls: AtomicUsize,
}

#[async_trait]
impl Prober for HangingProber {
    async fn check(&self, _spec: &ProbeSpec, binary: &Path, timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match tokio::time::timeout(timeout, std::future::pending::<()>()).await {
            Ok(()) => Ok(None),
            Err(_) => Err(format!("{} probe timed out", binary.display())),
        }
    }
}

#[tokio::test]
async fn test_non_linux_host_skips_linux_only_probes() {
    setup_test_logging();
    let prober = Arc::new(ScriptedProber::default().with(Backend::Docker, "Docker version 24.0.7"));
    let detector = RuntimeDetector::new()
        .with_host(HostOs::MacOs)
        .with_prober(prober.clone());

    let runtimes = detector.detect().await;
    let by_backend = |backend: Backend| runtimes.iter().find(|r| r.backend == backend).unwrap();

    assert!(!by_backend(Backend::Gvisor).available);
    assert!(!by_backend(Backend::Nsjail).available);
    assert!(by_backend(Backend::Docker).available);
    assert_eq!(by_backend(Backend::Docker).version.as_deref(), Some("24.0.7"));

    let asked = prober.asked_backends();
    assert!(!asked.contains(&Backend::Gvisor));
    assert!(!asked.contains(&Backend::Nsjail));
    assert!(asked.contains(&Backend::SandboxExec));
}

#[tokio::test]
async fn test_probe_timeout_marks_unavailable() {
    setup_test_logging();
    let prober = Arc::new(HangingProber {
        calls: AtomicUsize::new(0),
    });
    let detector = RuntimeDetector::new()
        .with_host(HostOs::Linux)
        .with_timeout(Duration::from_millis(50))
        .with_prober(prober.clone());

    let started = std::time::Instant::now();
    let runtime = detector.probe(Backend::Gvisor).await;

    assert!(!runtime.available);
    assert!(runtime.reason.unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_detection_feeds_selection() {
    setup_test_logging();
    let prober = Arc::new(
        ScriptedProber::default()
            .with(Backend::Nsjail, "")
            .with(Backend::Docker, "25.0.3"),
    );
    let runtimes = RuntimeDetector::new()
        .with_host(HostOs::Linux)
        .with_prober(prober)
        .detect()
        .await;

    let selector = BackendSelector::new(runtimes.clone());
    assert_eq!(selector.select().unwrap().backend, Backend::Nsjail);

    // Process is reported available but stays off limits by default
    assert!(runtimes.iter().any(|r| r.backend == Backend::Process && r.available));
    let engine = EngineConfig {
        backend: Some(Backend::Process),
        ..EngineConfig::default()
    };
    let selector = BackendSelector::new(runtimes).configured(&engine);
    assert!(matches!(selector.select(), Err(SandboxError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_real_detection_never_fails() {
    setup_test_logging();
    let runtimes = RuntimeDetector::new()
        .with_timeout(Duration::from_secs(2))
        .detect()
        .await;

    assert_eq!(runtimes.len(), Backend::ALL.len());
    for runtime in &runtimes {
        assert_eq!(runtime.available, runtime.reason.is_none());
    }
}

#[tokio::test]
async fn test_probes_use_configured_binaries() {
    setup_test_logging();
    let engine = EngineConfig::from_toml_str(
        r#"
[gvisor]
binary = "/opt/gvisor/bin/runsc"

[docker]
binary = "/usr/local/bin/podman"
"#,
    )
    .unwrap();
    let prober = Arc::new(ScriptedProber::default().with(Backend::Gvisor, "runsc version 1.2.3"));

    let runtimes = RuntimeDetector::configured(&engine)
        .with_host(HostOs::Linux)
        .with_prober(prober.clone())
        .detect()
        .await;
    assert!(runtimes[0].available);

    let mut asked = prober.asked.lock().unwrap().clone();
    asked.sort();
    assert_eq!(
        asked,
        vec![
            (Backend::Gvisor, PathBuf::from("/opt/gvisor/bin/runsc")),
            (Backend::Nsjail, PathBuf::from("nsjail")),
            (Backend::Docker, PathBuf::from("/usr/local/bin/podman")),
        ]
    );
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_runtime_outside_path_is_selectable() {
    setup_test_logging();
    // Any binary that accepts `--version` and exits 0 stands in for runsc
    let engine = EngineConfig::from_toml_str("backend = \"gvisor\"\n\n[gvisor]\nbinary = \"/bin/echo\"\n")
        .unwrap();

    let selector = BackendSelector::detect(&engine).await;
    let decision = selector.select().unwrap();
    assert_eq!(decision.backend, Backend::Gvisor);
    assert!(decision.preferred);

    let sandbox = Sandbox::new(SandboxConfig::default(), GvisorDriver::new(engine.gvisor.clone())).unwrap();
    assert!(sandbox.is_available().await);

    let missing = GvisorOptions {
        binary: "/nonexistent/cordon/runsc".into(),
        ..GvisorOptions::default()
    };
    let sandbox = Sandbox::new(SandboxConfig::default(), GvisorDriver::new(missing)).unwrap();
    assert!(!sandbox.is_available().await);
}
