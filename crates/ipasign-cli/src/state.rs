//! Inputs remembered between invocations.
//!
//! Stored as JSON in `~/.ipasign/state.json`. Paths are kept verbatim even
//! when they no longer exist; the `restorable_*` accessors re-check them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use ipasign_core::pipeline::SigningRequest;

use crate::config::config_dir;

pub const STATE_ENV: &str = "IPASIGN_STATE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub last_archive: Option<PathBuf>,
    pub last_profile: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub identity: Option<String>,
    /// Most recent signed archive, the default for `install`.
    pub last_output: Option<PathBuf>,
}

/// State file in use: `IPASIGN_STATE` or `~/.ipasign/state.json`.
pub fn state_path() -> Result<PathBuf> {
    match std::env::var(STATE_ENV) {
        Ok(p) if !p.is_empty() => Ok(PathBuf::from(p)),
        _ => Ok(config_dir()?.join("state.json")),
    }
}

fn existing(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| p.exists())
}

impl SessionState {
    /// Loads state, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring corrupt state file {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn restorable_archive(&self) -> Option<&Path> {
        existing(&self.last_archive)
    }

    pub fn restorable_profile(&self) -> Option<&Path> {
        existing(&self.last_profile)
    }

    pub fn restorable_output(&self) -> Option<&Path> {
        existing(&self.last_output)
    }

    /// Remembers the inputs and result of a successful sign run.
    pub fn record_sign(&mut self, request: &SigningRequest, output: &Path) {
        self.last_archive = Some(request.archive.clone());
        self.last_profile = Some(request.profile.clone());
        self.identity = Some(request.identity.to_string());
        if request.output_dir.is_some() {
            self.output_dir = request.output_dir.clone();
        }
        self.last_output = Some(output.to_path_buf());
    }
}
