//! Engine config files, profiles and backend selection

use crate::common::setup_test_logging;
use assert_matches::assert_matches;
use cordon_sandbox::{
    Backend, BackendSelector, EngineConfig, ExecutionRequest, NetworkMode, SandboxError,
    SandboxRuntime,
};
use std::io::Write;
use std::time::Duration;

const ENGINE_TOML: &str = r#"
probe_timeout = "1s"
allow_unsandboxed = true
default_profile = "quick"

[docker]
image = "debian:bookworm-slim"
pids_limit = 32

[nsjail]
hostname = "jail"

[profiles.quick]
memory = "128Mi"
cpus = 0.5
timeout = "250ms"
max_output_bytes = 1000

[profiles.online]
timeout = "10s"

[profiles.online.network]
mode = "restricted"
allowed_hosts = ["example.com"]

[profiles.online.filesystem]
read_only = false
work_dir = "/work"
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_engine_config_from_file() {
    setup_test_logging();
    let file = write_config(ENGINE_TOML);
    let engine = EngineConfig::load(Some(file.path())).unwrap();

    assert_eq!(engine.probe_timeout, Duration::from_secs(1));
    assert!(engine.allow_unsandboxed);
    assert_eq!(engine.docker.image, "debian:bookworm-slim");
    assert_eq!(engine.docker.pids_limit, 32);
    assert_eq!(engine.nsjail.hostname, "jail");
    assert_eq!(engine.nsjail.max_open_files, 64);

    let quick = engine.profile(None).unwrap();
    assert_eq!(quick.memory_bytes().unwrap(), Some(128 * 1024 * 1024));
    assert_eq!(quick.timeout_ms(), 250);
    assert!(quick.filesystem.read_only);

    let online = engine.profile(Some("online")).unwrap();
    assert_eq!(online.network.mode, NetworkMode::Restricted);
    assert_eq!(online.network.allowed_hosts, vec!["example.com"]);
    assert!(!online.filesystem.read_only);
    assert_eq!(online.memory.as_deref(), Some("256Mi"));
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert_matches!(
        EngineConfig::load(Some(&path)),
        Err(SandboxError::ConfigFile { path: p, .. }) if p == path
    );
}

#[test]
fn test_malformed_file_names_path() {
    let file = write_config("probe_timeout = [");
    let err = EngineConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn test_invalid_profile_rejected_at_load() {
    let file = write_config("[profiles.bad]\nmemory = \"12 GB\"\n");
    assert_matches!(
        EngineConfig::load(Some(file.path())),
        Err(SandboxError::InvalidConfig(msg)) if msg.contains("bad")
    );
}

#[test]
fn test_profile_drives_selected_sandbox() {
    setup_test_logging();
    let engine = EngineConfig::from_toml_str(ENGINE_TOML).unwrap();
    let runtimes = vec![
        SandboxRuntime::unavailable(Backend::Gvisor, "runsc not found"),
        SandboxRuntime::unavailable(Backend::Nsjail, "nsjail not found on PATH"),
        SandboxRuntime::unavailable(Backend::Docker, "docker probe failed"),
        SandboxRuntime::available(Backend::Process, None),
    ];
    let selector = BackendSelector::new(runtimes).configured(&engine);

    let config = engine.profile(None).unwrap();
    let mut sandbox = selector.create(config, &engine).unwrap();
    assert_eq!(sandbox.backend(), Backend::Process);

    let result = tokio_test::block_on(async {
        let result = sandbox.execute(ExecutionRequest::new("sleep").arg("2")).await;
        sandbox.cleanup().await.unwrap();
        result
    });
    assert!(result.timed_out);
    assert!(result.duration_ms < 1_500);
}

#[test]
fn test_unavailable_preference_is_not_downgraded() {
    let engine = EngineConfig::from_toml_str("backend = \"gvisor\"").unwrap();
    let runtimes = vec![SandboxRuntime::available(Backend::Docker, Some("24.0.7".into()))];
    let selector = BackendSelector::new(runtimes).configured(&engine);

    assert_matches!(selector.select(), Err(SandboxError::Unavailable(Backend::Gvisor)));
}
