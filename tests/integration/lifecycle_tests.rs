//! Instance lifecycle: temp state, idempotent cleanup, concurrent instances

use crate::common::{process_sandbox, setup_test_logging, test_config};
use assert_matches::assert_matches;
use cordon_sandbox::runtime::docker::DockerOptions;
use cordon_sandbox::runtime::nsjail::{NsjailOptions, POLICY_FILE};
use cordon_sandbox::runtime::{DockerDriver, GvisorDriver, NsjailDriver};
use cordon_sandbox::{
    create_adapter, Backend, EngineConfig, ExecutionRequest, Outcome, Sandbox, SandboxAdapter,
    SandboxError,
};
use std::time::Duration;

#[tokio::test]
async fn test_initialize_is_idempotent() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    sandbox.initialize().await.unwrap();
    let first = sandbox.workspace_path().unwrap().to_path_buf();
    sandbox.initialize().await.unwrap();

    assert_eq!(sandbox.workspace_path().unwrap(), first);
    assert!(first.is_dir());

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_twice_is_harmless() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    sandbox.initialize().await.unwrap();
    let path = sandbox.workspace_path().unwrap().to_path_buf();

    sandbox.cleanup().await.unwrap();
    assert!(!path.exists());
    sandbox.cleanup().await.unwrap();
    assert!(sandbox.workspace_path().is_none());
}

#[tokio::test]
async fn test_cleanup_without_initialize() {
    let mut sandbox = process_sandbox(test_config());
    assert!(sandbox.cleanup().await.is_ok());
}

#[tokio::test]
async fn test_sequential_executions_share_instance() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config().writable());

    let write = ExecutionRequest::new("sh").args(["-c", "echo kept > state.txt"]);
    assert!(sandbox.execute(write).await.success);

    let read = sandbox.execute(ExecutionRequest::new("cat").arg("state.txt")).await;
    assert_eq!(read.stdout, "kept\n");

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_instances_run_concurrently() {
    setup_test_logging();
    let mut a = process_sandbox(test_config());
    let mut b = process_sandbox(test_config());
    assert_ne!(a.id(), b.id());

    let started = std::time::Instant::now();
    let (ra, rb) = tokio::join!(
        a.execute(ExecutionRequest::new("sh").args(["-c", "sleep 0.3; pwd"])),
        b.execute(ExecutionRequest::new("sh").args(["-c", "sleep 0.3; pwd"])),
    );

    assert!(ra.success && rb.success);
    assert_ne!(ra.stdout, rb.stdout);
    assert!(started.elapsed() < Duration::from_millis(1_500));

    a.cleanup().await.unwrap();
    b.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_nsjail_policy_lives_in_workspace() {
    setup_test_logging();
    let config = test_config().with_timeout(Duration::from_millis(2500));
    let mut sandbox = Sandbox::new(config, NsjailDriver::default()).unwrap();

    sandbox.initialize().await.unwrap();
    let policy_path = sandbox.workspace_path().unwrap().join(POLICY_FILE);
    let doc = std::fs::read_to_string(&policy_path).unwrap();
    assert!(doc.contains("\ntime_limit: 3\n"));
    assert!(doc.contains("\nrlimit_cpu: 30\n"));
    assert!(doc.contains("\nclone_newnet: true\n"));
    assert!(doc.contains("seccomp_string: \"DEFAULT KILL\""));

    let invocation = sandbox.invocation(&ExecutionRequest::new("echo").arg("hi"));
    assert_eq!(invocation.args[1], policy_path.display().to_string());

    sandbox.cleanup().await.unwrap();
    assert!(!policy_path.exists());
}

#[tokio::test]
async fn test_missing_runtime_binary_reports_spawn_failure() {
    setup_test_logging();
    let options = NsjailOptions {
        binary: "cordon-missing-nsjail".into(),
        ..NsjailOptions::default()
    };
    let mut sandbox = Sandbox::new(test_config(), NsjailDriver::new(options)).unwrap();

    let result = sandbox.execute(ExecutionRequest::new("echo").arg("hi")).await;
    assert!(!result.success);
    assert_matches!(result.outcome, Outcome::SpawnFailed { .. });

    sandbox.cleanup().await.unwrap();
}

#[test]
fn test_zero_memory_limit_rejected_for_every_backend() {
    let config = || test_config().with_memory("0Mi");
    assert_matches!(
        Sandbox::new(config(), DockerDriver::default()).err(),
        Some(SandboxError::InvalidConfig(_))
    );
    assert_matches!(
        Sandbox::new(config(), GvisorDriver::default()).err(),
        Some(SandboxError::InvalidConfig(_))
    );
    assert_matches!(
        Sandbox::new(config(), NsjailDriver::default()).err(),
        Some(SandboxError::InvalidConfig(_))
    );
}

#[tokio::test]
async fn test_docker_keeps_no_host_state() {
    setup_test_logging();
    let options = DockerOptions {
        binary: "cordon-missing-docker".into(),
        ..DockerOptions::default()
    };
    let mut sandbox = Sandbox::new(test_config(), DockerDriver::new(options)).unwrap();

    sandbox.initialize().await.unwrap();
    assert!(sandbox.workspace_path().is_none());
    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_gvisor_state_root_is_workspace() {
    setup_test_logging();
    let mut sandbox = Sandbox::new(test_config(), GvisorDriver::default()).unwrap();
    sandbox.initialize().await.unwrap();

    let root = format!("--root={}", sandbox.workspace_path().unwrap().display());
    let invocation = sandbox.invocation(&ExecutionRequest::new("true"));
    assert_eq!(invocation.args[0], "do");
    assert!(invocation.args.contains(&root));

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_boxed_adapter_round_trip() {
    setup_test_logging();
    let mut adapter = create_adapter(Backend::Process, test_config(), &EngineConfig::default()).unwrap();
    assert_eq!(adapter.backend(), Backend::Process);

    adapter.initialize().await.unwrap();
    let result = adapter.execute(ExecutionRequest::new("echo").arg("boxed")).await;
    assert_eq!(result.stdout, "boxed\n");
    adapter.cleanup().await.unwrap();
    adapter.cleanup().await.unwrap();
}
