//! Error types for the ipasign core library.

use std::path::PathBuf;

use thiserror::Error;

/// Steps a user can take when installing to a device fails.
const INSTALL_REMEDIATION: &str = "Try the following:\n  \
    1. Make sure the installer is present: brew install ideviceinstaller\n  \
    2. Unlock the device and accept the \"Trust This Computer\" prompt\n  \
    3. Or install manually from Xcode > Window > Devices and Simulators";

/// Core error type for resigning and device operations.
#[derive(Error, Debug)]
pub enum ResignError {
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("{tool} failed with exit code {exit_code}{}", format_output(.output))]
    ExternalToolFailure {
        tool: String,
        exit_code: i32,
        output: String,
    },

    #[error("Failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No .app bundle found under {}", .0.display())]
    BundleNotFound(PathBuf),

    #[error("Failed to decode provisioning profile: {0}")]
    ProfileDecodeFailure(String),

    #[error("Failed to extract entitlements: {0}")]
    EntitlementsExtractionFailure(String),

    #[error("{tool} is not installed. {remediation}")]
    ToolMissing { tool: String, remediation: String },

    #[error("{0}")]
    Precondition(String),

    #[error("Install failed{}\n\n{}", format_output(.output), INSTALL_REMEDIATION)]
    InstallFailure { output: String },

    #[error("Property list error: {0}")]
    Plist(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResignError {
    /// Returns false for advisory errors the caller should turn into a
    /// remediation prompt instead of a failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ResignError::ToolMissing { .. })
    }
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{}", trimmed)
    }
}

/// Result type alias for ipasign operations.
pub type Result<T> = std::result::Result<T, ResignError>;
