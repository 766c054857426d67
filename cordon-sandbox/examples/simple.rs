//! Simple sandbox example - detect runtimes and run a few commands

use cordon_sandbox::{
    BackendSelector, EngineConfig, ExecutionRequest, SandboxAdapter, SandboxConfig,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Fall back to the unsandboxed driver on hosts without a runtime
    let engine = EngineConfig {
        allow_unsandboxed: true,
        ..EngineConfig::default()
    };
    let selector = BackendSelector::detect(&engine).await;

    println!("=== Cordon Sandbox Example ===\n");
    for runtime in selector.runtimes() {
        println!(
            "  {:<13} available={} version={}",
            runtime.name,
            runtime.available,
            runtime.version.as_deref().unwrap_or("-")
        );
    }

    let config = SandboxConfig::default()
        .with_timeout(Duration::from_secs(2))
        .with_max_output_bytes(64);
    let mut sandbox = selector.create(config, &engine)?;
    println!("\nBackend: {}\n", sandbox.backend());

    println!("Example 1: Simple echo");
    run(sandbox.as_mut(), ExecutionRequest::new("echo").arg("Hello from sandbox!")).await;

    println!("\nExample 2: Output past the cap");
    run(sandbox.as_mut(), ExecutionRequest::new("seq").arg("1000")).await;

    println!("\nExample 3: Long running task with timeout");
    run(sandbox.as_mut(), ExecutionRequest::new("sleep").arg("10")).await;

    println!("\nExample 4: Error to stderr");
    run(
        sandbox.as_mut(),
        ExecutionRequest::new("sh").args(["-c", "echo 'Error message' >&2; exit 1"]),
    )
    .await;

    sandbox.cleanup().await?;
    Ok(())
}

async fn run(sandbox: &mut dyn SandboxAdapter, request: ExecutionRequest) {
    let result = sandbox.execute(request).await;

    print!("  stdout: {}", result.stdout);
    if result.stdout_truncated {
        println!(" [truncated]");
    }
    if !result.stderr.is_empty() {
        print!("  stderr: {}", result.stderr);
    }
    println!(
        "  Result: exit_code={} duration={}ms timed_out={}",
        result.exit_code, result.duration_ms, result.timed_out
    );
    if let Some(error) = result.error {
        println!("  Error: {}", error);
    }
}
