//! Provisioning profile decoding and property-list queries.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ResignError, Result};
use crate::tools::process::run_checked;
use crate::tools::{Tool, ToolLocator};

/// Converts a CMS-signed provisioning profile into a plain property list.
#[async_trait]
pub trait ProfileDecoder: Send + Sync {
    async fn decode(&self, profile: &Path, output: &Path) -> Result<()>;
}

/// Extracts a named top-level sub-tree of a property list into its own file.
#[async_trait]
pub trait PlistQuery: Send + Sync {
    async fn extract_key(&self, plist: &Path, key: &str, output: &Path) -> Result<()>;
}

/// Decodes profiles with `security cms -D`, falling back to
/// `openssl cms -verify -noverify` when `security` is unavailable.
pub struct SystemProfileDecoder {
    locator: Arc<ToolLocator>,
}

impl SystemProfileDecoder {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl ProfileDecoder for SystemProfileDecoder {
    async fn decode(&self, profile: &Path, output: &Path) -> Result<()> {
        if let Some(security) = self.locator.locate(Tool::Security) {
            run_checked(
                Tool::Security,
                &security,
                [
                    OsStr::new("cms"),
                    OsStr::new("-D"),
                    OsStr::new("-i"),
                    profile.as_os_str(),
                    OsStr::new("-o"),
                    output.as_os_str(),
                ],
            )
            .await?;
            return Ok(());
        }

        if let Some(openssl) = self.locator.locate(Tool::Openssl) {
            tracing::debug!("security not found, decoding profile with openssl");
            run_checked(
                Tool::Openssl,
                &openssl,
                [
                    OsStr::new("cms"),
                    OsStr::new("-verify"),
                    OsStr::new("-noverify"),
                    OsStr::new("-inform"),
                    OsStr::new("DER"),
                    OsStr::new("-in"),
                    profile.as_os_str(),
                    OsStr::new("-out"),
                    output.as_os_str(),
                ],
            )
            .await?;
            return Ok(());
        }

        Err(ResignError::ToolMissing {
            tool: Tool::Security.to_string(),
            remediation: Tool::Security.remediation().to_string(),
        })
    }
}

/// Queries with `PlistBuddy` when present, otherwise reads the file with the
/// `plist` crate.
pub struct SystemPlistQuery {
    locator: Arc<ToolLocator>,
}

impl SystemPlistQuery {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl PlistQuery for SystemPlistQuery {
    async fn extract_key(&self, plist: &Path, key: &str, output: &Path) -> Result<()> {
        let Some(plist_buddy) = self.locator.locate(Tool::PlistBuddy) else {
            return extract_key_native(plist, key, output).await;
        };

        let command = format!("Print :{}", key);
        let result = run_checked(
            Tool::PlistBuddy,
            &plist_buddy,
            [
                OsStr::new("-x"),
                OsStr::new("-c"),
                OsStr::new(&command),
                plist.as_os_str(),
            ],
        )
        .await?;

        tokio::fs::write(output, &result.stdout).await?;
        Ok(())
    }
}

/// Property-list queries with the `plist` crate only.
pub struct NativePlistQuery;

#[async_trait]
impl PlistQuery for NativePlistQuery {
    async fn extract_key(&self, plist: &Path, key: &str, output: &Path) -> Result<()> {
        extract_key_native(plist, key, output).await
    }
}

/// Reads `plist`, picks `key` from its root dictionary and writes that value
/// as an XML property list.
pub async fn extract_key_native(plist: &Path, key: &str, output: &Path) -> Result<()> {
    let plist = plist.to_path_buf();
    let output = output.to_path_buf();
    let key = key.to_string();

    tokio::task::spawn_blocking(move || {
        let value = plist::Value::from_file(&plist)
            .map_err(|e| ResignError::Plist(format!("{}: {}", plist.display(), e)))?;
        let entry = value
            .as_dictionary()
            .and_then(|dict| dict.get(&key))
            .ok_or_else(|| {
                ResignError::Plist(format!("Key '{}' not found in {}", key, plist.display()))
            })?;
        entry
            .to_file_xml(&output)
            .map_err(|e| ResignError::Plist(format!("{}: {}", output.display(), e)))
    })
    .await
    .map_err(|e| ResignError::Plist(format!("plist task failed: {}", e)))?
}
