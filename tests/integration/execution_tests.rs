//! End-to-end execution through the process driver

use crate::common::{process_sandbox, setup_test_logging, test_config};
use assert_matches::assert_matches;
use cordon_sandbox::{ExecutionRequest, Outcome, SandboxAdapter, NO_EXIT_CODE};
use std::time::Duration;

#[tokio::test]
async fn test_echo_hello() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox
        .execute(ExecutionRequest::new("echo").arg("hello"))
        .await;

    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hello\n");
    assert!(!result.timed_out);
    assert!(!result.killed);
    assert!(result.error.is_none());

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_sleep_past_deadline_times_out() {
    setup_test_logging();
    let config = test_config().with_timeout(Duration::from_millis(100));
    let mut sandbox = process_sandbox(config);

    let result = sandbox
        .execute(ExecutionRequest::new("sleep").arg("5"))
        .await;

    assert!(!result.success);
    assert!(result.timed_out);
    assert!(!result.killed);
    assert_eq!(result.exit_code, NO_EXIT_CODE);
    assert_matches!(result.outcome, Outcome::TimedOut);
    assert!(result.duration_ms >= 100);
    assert!(result.duration_ms < 2_000, "took {}ms", result.duration_ms);

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_output_capped_at_limit() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox
        .execute(ExecutionRequest::new("head").args(["-c", "5000", "/dev/zero"]))
        .await;

    assert!(result.success);
    assert_eq!(result.stdout.len(), 1000);
    assert!(result.stdout_truncated);
    assert!(!result.stderr_truncated);
    assert_eq!(result.resource_usage.unwrap().stdout_bytes, 5000);

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_stderr_capped_at_max_output() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox
        .execute(ExecutionRequest::new("sh").args(["-c", "head -c 5000 /dev/zero >&2"]))
        .await;

    assert!(result.success);
    assert_eq!(result.stderr.len(), 1000);
    assert!(result.stderr_truncated);
    assert!(!result.stdout_truncated);
    assert_eq!(result.resource_usage.unwrap().stderr_bytes, 5000);

    sandbox.cleanup().await.unwrap();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_reaps_background_children() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config().with_timeout(Duration::from_millis(300)));

    let request = ExecutionRequest::new("sh").args(["-c", "sleep 7 & echo $!; wait; echo done"]);
    let result = sandbox.execute(request).await;
    assert!(result.timed_out);
    assert!(!result.stdout.contains("done"));

    let pid = result.stdout.trim();
    let mut alive = true;
    for _ in 0..40 {
        alive = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => false,
            Ok(stat) => !stat.rsplit(')').next().unwrap().trim_start().starts_with('Z'),
        };
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive, "sleep {} outlived the timeout", pid);

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_stdin_is_delivered_and_closed() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox
        .execute(ExecutionRequest::new("cat").with_stdin("hello stdin"))
        .await;

    assert!(result.success);
    assert_eq!(result.stdout, "hello stdin");

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_env_passes_through() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let request = ExecutionRequest::new("sh")
        .args(["-c", "printf %s \"$GREETING\""])
        .with_env("GREETING", "hi there");
    let result = sandbox.execute(request).await;

    assert!(result.success);
    assert_eq!(result.stdout, "hi there");

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_nonzero_exit_and_stderr() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let request = ExecutionRequest::new("sh").args(["-c", "echo broken >&2; exit 4"]);
    let result = sandbox.execute(request).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 4);
    assert_eq!(result.stderr, "broken\n");
    assert_matches!(result.outcome, Outcome::Completed { exit_code: 4 });

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_missing_binary_is_spawn_failure() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox
        .execute(ExecutionRequest::new("cordon-no-such-binary"))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, NO_EXIT_CODE);
    assert!(!result.timed_out);
    assert!(result.error.as_deref().unwrap().contains("cordon-no-such-binary"));
    assert_matches!(result.outcome, Outcome::SpawnFailed { .. });

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_external_kill_is_not_a_timeout() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox
        .execute(ExecutionRequest::new("sh").args(["-c", "kill -9 $$"]))
        .await;

    assert!(!result.success);
    assert!(result.killed);
    assert!(!result.timed_out);
    assert_eq!(result.exit_code, NO_EXIT_CODE);
    assert_matches!(result.outcome, Outcome::Signaled { signal: 9 });

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_runs_in_workspace_unless_overridden() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());
    sandbox.initialize().await.unwrap();
    let workspace = std::fs::canonicalize(sandbox.workspace_path().unwrap()).unwrap();

    let result = sandbox.execute(ExecutionRequest::new("pwd")).await;
    assert_eq!(result.stdout.trim_end(), workspace.display().to_string());

    let other = tempfile::tempdir().unwrap();
    let other_path = std::fs::canonicalize(other.path()).unwrap();
    let result = sandbox
        .execute(ExecutionRequest::new("pwd").with_work_dir(&other_path))
        .await;
    assert_eq!(result.stdout.trim_end(), other_path.display().to_string());

    sandbox.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_result_serializes_with_outcome() {
    setup_test_logging();
    let mut sandbox = process_sandbox(test_config());

    let result = sandbox.execute(ExecutionRequest::new("true")).await;
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["outcome"]["kind"], "completed");
    assert_eq!(json["outcome"]["exit_code"], 0);

    sandbox.cleanup().await.unwrap();
}
