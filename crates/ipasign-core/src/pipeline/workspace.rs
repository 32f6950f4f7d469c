//! Per-run temporary workspace.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{ResignError, Result};

/// Top-level directory of an app archive.
pub const PAYLOAD_DIR: &str = "Payload";

const WORKSPACE_PREFIX: &str = "ipasign-";

/// An exclusively owned, uniquely named temporary directory.
///
/// Call [`Workspace::close`] to remove it and log failures. If the value is
/// dropped instead (panic, aborted task), the directory is still removed on a
/// best-effort basis.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates a workspace under `root`, or under the system temp directory.
    pub fn acquire(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| ResignError::Workspace(format!("Failed to create workspace: {}", e)))?;

        tracing::debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.dir.path().join(PAYLOAD_DIR)
    }

    /// Removes the workspace. Failures are logged and swallowed so they never
    /// replace the outcome of the run.
    pub async fn close(self) {
        let path = self.dir.path().to_path_buf();
        match tokio::task::spawn_blocking(move || self.dir.close()).await {
            Ok(Ok(())) => tracing::debug!("Removed workspace {}", path.display()),
            Ok(Err(e)) => {
                tracing::warn!("Failed to remove workspace {}: {}", path.display(), e)
            }
            Err(e) => tracing::warn!("Workspace cleanup task failed: {}", e),
        }
    }
}
