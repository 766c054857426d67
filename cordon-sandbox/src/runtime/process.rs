//! Process driver: runs the command directly, without isolation
//!
//! Only the supervisor's limits apply (deadline and output cap). Memory, CPU,
//! network and filesystem settings are ignored. The command leads its own
//! process group so a timeout also kills anything it forked. Useful on hosts with no
//! sandbox runtime and for exercising the supervisor in tests.

use super::{Backend, Driver, InstanceContext};
use crate::error::Result;
use crate::supervisor::Invocation;
use crate::types::ExecutionRequest;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDriver;

#[async_trait]
impl Driver for ProcessDriver {
    const BACKEND: Backend = Backend::Process;

    async fn prepare(&self, ctx: InstanceContext<'_>) -> Result<()> {
        tracing::warn!(instance = %ctx.id, "Running without isolation; only timeout and output limits apply");
        Ok(())
    }

    fn invocation(&self, ctx: InstanceContext<'_>, request: &ExecutionRequest) -> Invocation {
        let mut invocation = Invocation::new(&request.command);
        invocation.args(request.args.iter().cloned());

        invocation.cwd = ctx
            .work_dir(request)
            .map(|dir| dir.to_path_buf())
            .or_else(|| ctx.workspace.map(|workspace| workspace.path().to_path_buf()));

        invocation.env = request.env.clone();
        if let Some(workspace) = ctx.workspace {
            invocation
                .env
                .entry("TMPDIR".to_string())
                .or_insert_with(|| workspace.scratch_dir().display().to_string());
        }
        invocation.stdin = request.stdin.clone();
        invocation.process_group = true;
        invocation
    }
}
