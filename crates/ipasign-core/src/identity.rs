//! Signing identities known to the host keychain.

use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ResignError, Result};
use crate::tools::process::{run_captured, run_checked};
use crate::tools::{Tool, ToolLocator};

/// Display name of a code-signing credential, passed verbatim to `codesign`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningIdentity(String);

impl SigningIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SigningIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SigningIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Enumerates code-signing identities through `security find-identity`.
pub struct IdentityRegistry {
    locator: Arc<ToolLocator>,
}

impl IdentityRegistry {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    /// Lists distinct signing identities in first-seen order.
    ///
    /// Enumeration is advisory: a missing tool or unusable output yields an
    /// empty list rather than an error.
    pub async fn list_signing_identities(&self) -> Vec<SigningIdentity> {
        let Some(security) = self.locator.locate(Tool::Security) else {
            tracing::debug!("security not found, no identities to list");
            return Vec::new();
        };

        match run_captured(
            Tool::Security,
            &security,
            ["find-identity", "-v", "-p", "codesigning"],
        )
        .await
        {
            Ok(output) => parse_identities(&output.combined()),
            Err(e) => {
                tracing::warn!("Failed to list signing identities: {}", e);
                Vec::new()
            }
        }
    }

    /// Imports a certificate into the default keychain.
    ///
    /// `.cer` files are added as-is; `.p12` files are imported with their
    /// password and granted to `codesign`.
    pub async fn import_certificate(&self, path: &Path, password: Option<&str>) -> Result<()> {
        if !path.is_file() {
            return Err(ResignError::Precondition(format!(
                "Certificate file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let security = self.locator.require(Tool::Security)?;

        match extension.as_str() {
            "cer" => {
                run_checked(
                    Tool::Security,
                    &security,
                    [OsStr::new("add-certificates"), path.as_os_str()],
                )
                .await?;
            }
            "p12" => {
                let codesign = self
                    .locator
                    .locate(Tool::Codesign)
                    .unwrap_or_else(|| "/usr/bin/codesign".into());
                run_checked(
                    Tool::Security,
                    &security,
                    [
                        OsStr::new("import"),
                        path.as_os_str(),
                        OsStr::new("-P"),
                        OsStr::new(password.unwrap_or("")),
                        OsStr::new("-T"),
                        codesign.as_os_str(),
                    ],
                )
                .await?;
            }
            _ => {
                return Err(ResignError::Precondition(format!(
                    "Unsupported certificate type '{}': expected .cer or .p12",
                    path.display()
                )));
            }
        }

        tracing::info!("Imported certificate {}", path.display());
        Ok(())
    }
}

static QUOTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.*)""#).expect("identity name pattern is valid"));

/// Extracts quoted identity names from `security find-identity` output.
///
/// Each line contributes the text between its first and last double quote.
/// Duplicates keep their first position.
pub fn parse_identities(output: &str) -> Vec<SigningIdentity> {
    let mut identities: Vec<SigningIdentity> = Vec::new();
    for line in output.lines() {
        let Some(name) = QUOTED_NAME.captures(line).and_then(|c| c.get(1)) else {
            continue;
        };
        let name = name.as_str().trim_matches('"');
        if name.is_empty() || identities.iter().any(|i| i.as_str() == name) {
            continue;
        }
        identities.push(SigningIdentity::new(name));
    }
    identities
}
