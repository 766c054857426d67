//! CLI command implementations

use crate::RunArgs;
use anyhow::{Context, Result};
use cordon_sandbox::{
    BackendSelector, EngineConfig, ExecutionRequest, ExecutionResult, InstanceId, NsjailPolicy,
    Outcome, SandboxConfig,
};
use tracing::{debug, info, warn};

/// Exit status for a command killed by the deadline (matches coreutils `timeout`)
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit status when the sandbox could not start the command
pub const EXIT_SPAWN_FAILED: i32 = 125;

/// Probe every backend and print a table (or JSON).
pub async fn detect(engine: &EngineConfig, json: bool) -> Result<()> {
    let selector = BackendSelector::detect(engine).await;

    if json {
        println!("{}", serde_json::to_string_pretty(selector.runtimes())?);
        return Ok(());
    }

    println!("{:<14} {:<10} {:<14} NOTE", "BACKEND", "AVAILABLE", "VERSION");
    for runtime in selector.runtimes() {
        println!(
            "{:<14} {:<10} {:<14} {}",
            runtime.name,
            if runtime.available { "yes" } else { "no" },
            runtime.version.as_deref().unwrap_or("-"),
            runtime.reason.as_deref().unwrap_or("")
        );
    }

    match selector.select() {
        Ok(decision) => println!("\nSelected: {} ({})", decision.backend, decision.reason),
        Err(e) => println!("\nSelected: none ({})", e),
    }
    Ok(())
}

/// Run one command and return the exit status the CLI should report.
pub async fn run(engine: &EngineConfig, args: RunArgs) -> Result<i32> {
    let config = sandbox_config(engine, &args)?;
    let request = execution_request(&args).await?;

    let mut selector = BackendSelector::detect(engine)
        .await
        .allow_unsandboxed(engine.allow_unsandboxed || args.allow_unsandboxed);
    if let Some(backend) = args.backend {
        selector = selector.prefer(backend);
    }

    let mut sandbox = selector
        .create(config, engine)
        .context("Failed to create sandbox")?;
    info!(backend = %sandbox.backend(), instance = %sandbox.instance_id(), "Sandbox ready");

    let result = sandbox.execute(request).await;
    if let Err(e) = sandbox.cleanup().await {
        warn!(error = %e, "Sandbox cleanup failed");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_output(&result);
    }

    Ok(exit_status(&result))
}

/// Render the nsjail policy for a profile.
pub fn policy(engine: &EngineConfig, profile: Option<&str>) -> Result<()> {
    let config = engine.profile(profile)?;
    config.validate()?;

    // Real instances mount their own workspace; this path is illustrative.
    let id = InstanceId::new();
    let scratch = std::env::temp_dir().join(id.name()).join("scratch");

    let policy = NsjailPolicy::from_config(
        id,
        &config,
        &scratch,
        &engine.nsjail.hostname,
        engine.nsjail.max_open_files,
    )?;
    print!("{}", policy.render());
    Ok(())
}

/// Profile from the engine config with command-line overrides on top.
pub fn sandbox_config(engine: &EngineConfig, args: &RunArgs) -> Result<SandboxConfig> {
    let mut config = engine.profile(args.profile.as_deref())?;

    if let Some(memory) = &args.memory {
        config = config.with_memory(memory.clone());
    }
    if let Some(cpu) = args.cpu {
        config = config.with_cpus(cpu);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_timeout(timeout);
    }
    if let Some(bytes) = args.max_output {
        config = config.with_max_output_bytes(bytes);
    }
    if let Some(mode) = args.network {
        config = config.with_network(mode);
    }
    if args.writable {
        config = config.writable();
    }

    config.validate()?;
    debug!(?config, "Resolved sandbox config");
    Ok(config)
}

async fn execution_request(args: &RunArgs) -> Result<ExecutionRequest> {
    let (command, rest) = args
        .command
        .split_first()
        .context("No command given")?;

    let mut request = ExecutionRequest::new(command.clone()).args(rest.iter().cloned());
    for (key, value) in &args.env {
        request = request.with_env(key.clone(), value.clone());
    }
    if let Some(dir) = &args.workdir {
        request = request.with_work_dir(dir.clone());
    }
    if let Some(path) = &args.stdin_file {
        let input = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read stdin file {}", path.display()))?;
        request = request.with_stdin(input);
    }
    Ok(request)
}

fn print_output(result: &ExecutionResult) {
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    if result.stdout_truncated || result.stderr_truncated {
        warn!(
            stdout_truncated = result.stdout_truncated,
            stderr_truncated = result.stderr_truncated,
            "Output exceeded the cap and was truncated"
        );
    }
    match &result.outcome {
        Outcome::TimedOut => warn!(duration_ms = result.duration_ms, "Command timed out"),
        Outcome::Signaled { signal } => warn!(signal, "Command killed by signal"),
        Outcome::SpawnFailed { error } => warn!(%error, "Command could not be started"),
        Outcome::Completed { .. } => {}
    }
}

/// Shell-style exit status for a result.
pub fn exit_status(result: &ExecutionResult) -> i32 {
    match &result.outcome {
        Outcome::Completed { exit_code } => *exit_code,
        Outcome::TimedOut => EXIT_TIMEOUT,
        Outcome::Signaled { signal } => 128 + signal,
        Outcome::SpawnFailed { .. } => EXIT_SPAWN_FAILED,
    }
}
