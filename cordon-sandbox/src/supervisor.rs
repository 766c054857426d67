//! Spawn, capture and deadline enforcement shared by every backend

use crate::execution::{ExecutionPhase, InstanceId, PhaseTracker};
use crate::sink::BoundedSink;
use crate::types::{ExecutionResult, Outcome, ResourceUsage, NO_EXIT_CODE};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long to keep draining pipes after the process is reaped.
///
/// Descendants that inherited the pipes can keep them open; their output is
/// abandoned once this elapses.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8 * 1024;

/// A concrete external-process invocation built by a driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,

    /// Set on the launched process on top of the inherited environment
    pub env: BTreeMap<String, String>,

    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,

    /// Run as leader of a new process group and kill the whole group on
    /// timeout. Unix only.
    pub process_group: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Hard limits enforced around one execution
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// Run `invocation` to completion or until the deadline fires.
///
/// Never fails: spawn errors, timeouts and signals are all folded into the
/// returned [`ExecutionResult`].
pub async fn supervise(instance: InstanceId, invocation: &Invocation, limits: Limits) -> ExecutionResult {
    let start = Instant::now();
    let mut phases = PhaseTracker::new(instance);
    let program = invocation.program.display().to_string();

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(&invocation.env)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }
    #[cfg(unix)]
    if invocation.process_group {
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            phases.advance(ExecutionPhase::SpawnError);
            phases.advance(ExecutionPhase::Reaped);
            tracing::warn!(instance = %instance, program = %program, error = %e, "Failed to spawn process");
            return ExecutionResult::spawn_failed(
                format!("Failed to spawn {}: {}", program, e),
                elapsed_ms(start),
            );
        }
    };
    phases.advance(ExecutionPhase::Spawned);
    tracing::debug!(
        instance = %instance,
        program = %program,
        pid = child.id(),
        timeout_ms = limits.timeout.as_millis() as u64,
        "Process spawned"
    );

    if let (Some(input), Some(mut pipe)) = (invocation.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            // The process may exit without reading; a broken pipe is expected then.
            if let Err(e) = pipe.write_all(&input).await {
                tracing::debug!(error = %e, "Stdin write ended early");
            }
            drop(pipe);
        });
    }

    let stdout = Arc::new(Mutex::new(BoundedSink::new(limits.max_output_bytes)));
    let stderr = Arc::new(Mutex::new(BoundedSink::new(limits.max_output_bytes)));
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        readers.push(tokio::spawn(drain(pipe, stdout.clone())));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(tokio::spawn(drain(pipe, stderr.clone())));
    }

    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::time::sleep(limits.timeout) => None,
    };

    let (status, timed_out) = match finished {
        Some(status) => {
            phases.advance(ExecutionPhase::Completed);
            (status, false)
        }
        None => {
            phases.advance(ExecutionPhase::TimedOut);
            tracing::warn!(
                instance = %instance,
                program = %program,
                timeout_ms = limits.timeout.as_millis() as u64,
                "Deadline reached, killing process"
            );
            if invocation.process_group {
                kill_group(&child);
            }
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Kill failed, process already gone");
            }
            let status = child.wait().await;
            phases.advance(ExecutionPhase::Killed);
            (status, true)
        }
    };

    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!(instance = %instance, "Output pipes still open after exit, abandoning");
        for reader in &readers {
            reader.abort();
        }
    }
    phases.advance(ExecutionPhase::Reaped);

    let outcome = match status {
        Err(e) => Outcome::SpawnFailed {
            error: format!("Failed to wait for {}: {}", program, e),
        },
        Ok(_) if timed_out => Outcome::TimedOut,
        Ok(status) => classify(status),
    };

    let stdout = std::mem::replace(&mut *stdout.lock().await, BoundedSink::new(0));
    let stderr = std::mem::replace(&mut *stderr.lock().await, BoundedSink::new(0));
    let usage = ResourceUsage {
        stdout_bytes: stdout.bytes_seen(),
        stderr_bytes: stderr.bytes_seen(),
    };

    let result = build_result(outcome, stdout, stderr, usage, elapsed_ms(start));
    tracing::info!(
        instance = %instance,
        program = %program,
        exit_code = result.exit_code,
        timed_out = result.timed_out,
        killed = result.killed,
        duration_ms = result.duration_ms,
        "Execution finished"
    );
    result
}


/// SIGKILL every process in the group `child` leads, including descendants
/// that would otherwise outlive it.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: `pid` belongs to an unreaped child spawned as a group leader,
    // so the negated id addresses that group and no other.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc == -1 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "Process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

async fn drain<R>(mut pipe: R, sink: Arc<Mutex<BoundedSink>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                sink.lock().await.push(&buf[..n]);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output pipe read failed");
                break;
            }
        }
    }
}

fn classify(status: ExitStatus) -> Outcome {
    match status.code() {
        Some(exit_code) => Outcome::Completed { exit_code },
        None => Outcome::Signaled {
            signal: exit_signal(&status).unwrap_or(0),
        },
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn build_result(
    outcome: Outcome,
    stdout: BoundedSink,
    stderr: BoundedSink,
    usage: ResourceUsage,
    duration_ms: u64,
) -> ExecutionResult {
    let (exit_code, timed_out, killed, error) = match &outcome {
        Outcome::Completed { exit_code } => (*exit_code, false, false, None),
        Outcome::TimedOut => (NO_EXIT_CODE, true, false, None),
        Outcome::Signaled { .. } => (NO_EXIT_CODE, false, true, None),
        Outcome::SpawnFailed { error } => (NO_EXIT_CODE, false, false, Some(error.clone())),
    };

    ExecutionResult {
        success: exit_code == 0 && !timed_out && !killed && error.is_none(),
        exit_code,
        stdout_truncated: stdout.is_truncated(),
        stderr_truncated: stderr.is_truncated(),
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
        timed_out,
        killed,
        duration_ms,
        resource_usage: Some(usage),
        error,
        outcome,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
