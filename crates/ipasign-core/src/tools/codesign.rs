//! Code signing of bundles and libraries.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::SigningIdentity;
use crate::tools::process::run_checked;
use crate::tools::{Tool, ToolLocator};

/// Signs a bundle or library in place.
#[async_trait]
pub trait SignerTool: Send + Sync {
    /// Replaces any existing signature on `target` with one made by
    /// `identity`, asserting `entitlements` when given.
    async fn sign(
        &self,
        target: &Path,
        identity: &SigningIdentity,
        entitlements: Option<&Path>,
    ) -> Result<()>;
}

/// Signer backed by `codesign`.
pub struct Codesign {
    locator: Arc<ToolLocator>,
}

impl Codesign {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl SignerTool for Codesign {
    async fn sign(
        &self,
        target: &Path,
        identity: &SigningIdentity,
        entitlements: Option<&Path>,
    ) -> Result<()> {
        let codesign = self.locator.require(Tool::Codesign)?;

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("-f"),
            OsStr::new("-s"),
            OsStr::new(identity.as_str()),
        ];
        if let Some(entitlements) = entitlements {
            args.push(OsStr::new("--entitlements"));
            args.push(entitlements.as_os_str());
        }
        args.push(target.as_os_str());

        run_checked(Tool::Codesign, &codesign, args).await?;
        tracing::debug!("Signed {}", target.display());
        Ok(())
    }
}
