//! Per-instance temporary directory

use crate::error::{Result, SandboxError};
use crate::execution::InstanceId;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Writable scratch area mounted as the sandbox's `/tmp`
const SCRATCH_DIR: &str = "scratch";

/// Unique temp directory owned by one sandbox instance.
///
/// Removed by [`Workspace::remove`]; dropping it also removes the tree.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create under the system temp directory.
    pub async fn create(id: InstanceId) -> Result<Self> {
        Self::create_in(std::env::temp_dir(), id).await
    }

    pub async fn create_in(base: impl Into<PathBuf>, id: InstanceId) -> Result<Self> {
        let base = base.into();
        let prefix = format!("{}-", id.name());

        let dir = tokio::task::spawn_blocking(move || -> std::io::Result<TempDir> {
            let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(&base)?;
            std::fs::create_dir(dir.path().join(SCRATCH_DIR))?;
            Ok(dir)
        })
        .await
        .map_err(|e| SandboxError::Workspace(std::io::Error::other(e)))?
        .map_err(SandboxError::Workspace)?;

        tracing::debug!(instance = %id, path = %dir.path().display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join(SCRATCH_DIR)
    }

    /// Write `contents` to `name` inside the workspace.
    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| SandboxError::Policy {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Delete the directory tree.
    pub async fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(|e| SandboxError::Workspace(std::io::Error::other(e)))?
            .map_err(SandboxError::Workspace)?;
        tracing::debug!(path = %path.display(), "Removed workspace");
        Ok(())
    }
}
