//! gVisor driver: every isolation decision is a `runsc` flag

use super::{path_string, run_best_effort, Backend, Driver, InstanceContext};
use crate::config::NetworkMode;
use crate::supervisor::Invocation;
use crate::types::ExecutionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GvisorOptions {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_rootless")]
    pub rootless: bool,
}

fn default_binary() -> PathBuf {
    PathBuf::from("runsc")
}

fn default_rootless() -> bool {
    true
}

impl Default for GvisorOptions {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            rootless: default_rootless(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GvisorDriver {
    options: GvisorOptions,
}

impl GvisorDriver {
    pub fn new(options: GvisorOptions) -> Self {
        Self { options }
    }

    /// Flags shared by `do` and `kill` so both address the same state root
    fn global_flags(&self, ctx: InstanceContext<'_>) -> Vec<String> {
        let mut flags = Vec::new();
        if self.options.rootless {
            flags.push("--rootless".to_string());
        }
        if let Some(workspace) = ctx.workspace {
            flags.push(format!("--root={}", path_string(workspace.path())));
        }
        flags
    }

    fn network_flag(mode: NetworkMode) -> &'static str {
        match mode {
            NetworkMode::None => "--network=none",
            NetworkMode::Host => "--network=host",
            NetworkMode::Restricted => "--network=sandbox",
        }
    }
}

#[async_trait]
impl Driver for GvisorDriver {
    const BACKEND: Backend = Backend::Gvisor;

    fn binary(&self) -> Option<&Path> {
        Some(&self.options.binary)
    }

    fn invocation(&self, ctx: InstanceContext<'_>, request: &ExecutionRequest) -> Invocation {
        let config = ctx.config;
        let mut invocation = Invocation::new(&self.options.binary);

        // `--rootless` and `--root` are runsc global flags. They follow `do`
        // in this argument list, but stock runsc only parses global flags
        // before the subcommand, as `terminate` passes them.
        invocation.arg("do");
        invocation.args(self.global_flags(ctx));
        invocation.arg(Self::network_flag(config.network.mode));

        // validate() already accepted the memory string
        if let Ok(Some(bytes)) = config.memory_bytes() {
            invocation.arg(format!("--memory={}", bytes));
        }
        if let Some(cpus) = config.cpus {
            invocation.arg(format!("--cpus={}", cpus));
        }
        if config.filesystem.read_only {
            invocation.arg("--read-only");
        }
        if let Some(dir) = ctx.work_dir(request) {
            invocation.arg(format!("--cwd={}", path_string(dir)));
        }
        invocation.arg(format!("--name={}", ctx.id.name()));

        if config.user.is_some() || !config.capabilities.is_empty() {
            tracing::debug!(instance = %ctx.id, "runsc ignores user and capability settings");
        }

        invocation
            .arg("--")
            .arg(request.command.clone())
            .args(request.args.iter().cloned());

        invocation.env = request.env.clone();
        invocation.stdin = request.stdin.clone();
        invocation
    }

    async fn terminate(&self, ctx: InstanceContext<'_>) {
        let mut args = self.global_flags(ctx);
        args.extend(["kill".to_string(), ctx.id.name(), "KILL".to_string()]);
        run_best_effort(&self.options.binary, &args).await;
    }
}
