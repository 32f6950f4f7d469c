//! Zip archive extraction and creation.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::tools::process::run_quiet;
use crate::tools::{Tool, ToolLocator};

/// Unpacks and packs zip-compatible archives.
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Extracts `archive` into `dest`, overwriting existing entries.
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Compresses `base_dir/entry` into `output`, storing paths relative to
    /// `base_dir` so the archive's top level is `entry`.
    async fn create(&self, base_dir: &Path, entry: &str, output: &Path) -> Result<()>;
}

/// Archive tool backed by the system `unzip` and `zip` executables.
///
/// Output is discarded; only the exit status is consulted.
pub struct SystemArchiveTool {
    locator: Arc<ToolLocator>,
}

impl SystemArchiveTool {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl ArchiveTool for SystemArchiveTool {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let unzip = self.locator.require(Tool::Unzip)?;
        run_quiet(
            Tool::Unzip,
            &unzip,
            [
                OsStr::new("-o"),
                OsStr::new("-q"),
                archive.as_os_str(),
                OsStr::new("-d"),
                dest.as_os_str(),
            ],
            None,
        )
        .await
    }

    async fn create(&self, base_dir: &Path, entry: &str, output: &Path) -> Result<()> {
        let zip = self.locator.require(Tool::Zip)?;
        // -y keeps symlinks inside frameworks as links, as the signature expects
        run_quiet(
            Tool::Zip,
            &zip,
            [
                OsStr::new("-q"),
                OsStr::new("-r"),
                OsStr::new("-y"),
                output.as_os_str(),
                OsStr::new(entry),
            ],
            Some(base_dir),
        )
        .await
    }
}
