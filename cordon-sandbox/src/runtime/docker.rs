//! Docker driver: one auto-removed container per execution

use super::{env_names, path_string, run_best_effort, Backend, Driver, InstanceContext};
use crate::supervisor::Invocation;
use crate::types::ExecutionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerOptions {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Base image the command runs in
    #[serde(default = "default_image")]
    pub image: String,

    /// Maximum number of processes inside the container
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
}

fn default_binary() -> PathBuf {
    PathBuf::from("docker")
}

fn default_image() -> String {
    "alpine:3.20".to_string()
}

fn default_pids_limit() -> u32 {
    64
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            image: default_image(),
            pids_limit: default_pids_limit(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DockerDriver {
    options: DockerOptions,
}

impl DockerDriver {
    pub fn new(options: DockerOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Driver for DockerDriver {
    const BACKEND: Backend = Backend::Docker;

    fn binary(&self) -> Option<&Path> {
        Some(&self.options.binary)
    }

    /// `--rm` hands container removal to the daemon; nothing lives on the host.
    fn needs_workspace(&self) -> bool {
        false
    }

    fn invocation(&self, ctx: InstanceContext<'_>, request: &ExecutionRequest) -> Invocation {
        let config = ctx.config;
        let mut invocation = Invocation::new(&self.options.binary);

        invocation.args(["run", "--rm", "-i", "--name"]);
        invocation.arg(ctx.id.name());

        if let Ok(Some(bytes)) = config.memory_bytes() {
            invocation.arg("--memory").arg(bytes.to_string());
        }
        if let Some(cpus) = config.cpus {
            invocation.arg("--cpus").arg(cpus.to_string());
        }

        invocation.args([
            "--network",
            "none",
            "--read-only",
            "--security-opt",
            "no-new-privileges",
            "--cap-drop",
            "ALL",
            "--pids-limit",
        ]);
        invocation.arg(self.options.pids_limit.to_string());

        for cap in config.capability_names() {
            invocation.arg("--cap-add").arg(cap);
        }
        if let Some(user) = &config.user {
            invocation.arg("--user").arg(user.clone());
        }
        if let Some(dir) = ctx.work_dir(request) {
            invocation.arg("--workdir").arg(path_string(dir));
        }
        for name in env_names(request) {
            invocation.arg("-e").arg(name);
        }

        invocation
            .arg(self.options.image.clone())
            .arg(request.command.clone())
            .args(request.args.iter().cloned());

        invocation.env = request.env.clone();
        invocation.stdin = request.stdin.clone();
        invocation
    }

    async fn terminate(&self, ctx: InstanceContext<'_>) {
        run_best_effort(&self.options.binary, &["kill".to_string(), ctx.id.name()]).await;
    }
}
