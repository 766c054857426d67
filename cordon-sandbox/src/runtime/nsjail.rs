//! nsjail driver: namespaces plus a seccomp allow-list from a generated policy

use super::{env_names, path_string, Backend, Driver, InstanceContext};
use crate::error::{Result, SandboxError};
use crate::policy::NsjailPolicy;
use crate::supervisor::Invocation;
use crate::types::ExecutionRequest;
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Policy file name inside the instance workspace
pub const POLICY_FILE: &str = "nsjail.cfg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NsjailOptions {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// `rlimit_nofile` for the jailed process
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,

    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_binary() -> PathBuf {
    PathBuf::from("nsjail")
}

fn default_max_open_files() -> u64 {
    64
}

fn default_hostname() -> String {
    "sandbox".to_string()
}

impl Default for NsjailOptions {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            max_open_files: default_max_open_files(),
            hostname: default_hostname(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NsjailDriver {
    options: NsjailOptions,
}

impl NsjailDriver {
    pub fn new(options: NsjailOptions) -> Self {
        Self { options }
    }

    /// Policy for the instance, as it would be written on initialize.
    pub fn policy(&self, ctx: InstanceContext<'_>) -> Result<NsjailPolicy> {
        let workspace = require_workspace(ctx)?;
        NsjailPolicy::from_config(
            ctx.id,
            ctx.config,
            &workspace.scratch_dir(),
            &self.options.hostname,
            self.options.max_open_files,
        )
    }
}

fn require_workspace<'a>(ctx: InstanceContext<'a>) -> Result<&'a Workspace> {
    ctx.workspace.ok_or_else(|| {
        SandboxError::InvalidConfig("nsjail policy needs an instance workspace".to_string())
    })
}

#[async_trait]
impl Driver for NsjailDriver {
    const BACKEND: Backend = Backend::Nsjail;

    fn binary(&self) -> Option<&Path> {
        Some(&self.options.binary)
    }

    async fn prepare(&self, ctx: InstanceContext<'_>) -> Result<()> {
        let workspace = require_workspace(ctx)?;
        let policy = self.policy(ctx)?;

        let path = workspace.write_file(POLICY_FILE, &policy.render()).await?;
        tracing::debug!(
            instance = %ctx.id,
            path = %path.display(),
            syscalls = policy.seccomp.len(),
            "Wrote nsjail policy"
        );
        Ok(())
    }

    fn invocation(&self, ctx: InstanceContext<'_>, request: &ExecutionRequest) -> Invocation {
        // Without a workspace nsjail reports the missing file itself
        let config_path = ctx
            .workspace
            .map(|workspace| workspace.path().join(POLICY_FILE))
            .unwrap_or_else(|| PathBuf::from(POLICY_FILE));

        let mut invocation = Invocation::new(&self.options.binary);
        invocation.arg("--config").arg(path_string(&config_path));

        for name in env_names(request) {
            invocation.arg("--env").arg(name);
        }
        // The policy already carries the config default
        if let Some(dir) = &request.work_dir {
            invocation.arg("--cwd").arg(path_string(dir));
        }

        invocation
            .arg("--")
            .arg(request.command.clone())
            .args(request.args.iter().cloned());

        invocation.env = request.env.clone();
        invocation.stdin = request.stdin.clone();
        invocation
    }
}
