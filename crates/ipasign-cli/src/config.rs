//! CLI configuration loading and resolution.
//!
//! Settings come from `~/.ipasign/config.huml` with priority order:
//! CLI flags > environment variables > config file > session state > defaults.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ipasign_core::tools::{Tool, ToolLocator};

use crate::state::SessionState;

pub const CONFIG_ENV: &str = "IPASIGN_CONFIG";
pub const WORKSPACE_DIR_ENV: &str = "IPASIGN_WORKSPACE_DIR";
pub const OUTPUT_DIR_ENV: &str = "IPASIGN_OUTPUT_DIR";

/// CLI configuration loaded from config.huml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliConfig {
    /// Root directory for signing workspaces (default: system temp dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    /// Default directory for signed archives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Tool name to absolute path, probed before the built-in locations.
    #[serde(default)]
    pub tools: BTreeMap<String, PathBuf>,
}

/// Resolved configuration after applying priority rules.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub workspace_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub tool_overrides: Vec<(Tool, PathBuf)>,
}

impl ResolvedConfig {
    /// Builds a locator with configured overrides ahead of the defaults.
    pub fn locator(&self) -> ToolLocator {
        self.tool_overrides
            .iter()
            .fold(ToolLocator::new(), |locator, (tool, path)| {
                locator.with_override(*tool, path.clone())
            })
    }

    /// Output directory for a sign run: flag, then configuration, then the
    /// directory used last time. `None` means next to the input archive.
    pub fn output_dir_for(&self, flag: Option<PathBuf>, state: &SessionState) -> Option<PathBuf> {
        flag.or_else(|| self.output_dir.clone())
            .or_else(|| state.output_dir.clone())
    }
}

/// Returns the config directory path (~/.ipasign).
pub fn config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".ipasign"))
        .context("Could not determine home directory")
}

/// Returns the default config file path (~/.ipasign/config.huml).
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.huml"))
}

/// Config file in use: `IPASIGN_CONFIG` or the default path.
pub fn config_path() -> Result<PathBuf> {
    match std::env::var(CONFIG_ENV) {
        Ok(p) if !p.is_empty() => Ok(PathBuf::from(p)),
        _ => default_config_path(),
    }
}

/// Load configuration from the config file.
///
/// Returns `Ok(None)` if the config file doesn't exist.
/// Returns an error if the file exists but is invalid.
pub fn load_config() -> Result<Option<CliConfig>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config =
        parse_config(&content).with_context(|| format!("Invalid config in {}", path.display()))?;

    check_file_permissions(&path);
    Ok(Some(config))
}

/// Parses and validates HUML config text.
pub fn parse_config(content: &str) -> Result<CliConfig> {
    // A file with only the version header and comments has no settings
    let has_entries = content.lines().map(str::trim).any(|line| {
        !line.is_empty() && !line.starts_with('%') && !line.starts_with('#')
    });
    if !has_entries {
        return Ok(CliConfig::default());
    }

    let config: CliConfig = huml_rs::serde::from_str(content).context("Invalid HUML")?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &CliConfig) -> Result<()> {
    for (name, path) in &config.tools {
        if let Err(e) = name.parse::<Tool>() {
            bail!("{}", e);
        }
        if !path.is_absolute() {
            bail!(
                "Tool '{}' must be an absolute path, got '{}'",
                name,
                path.display()
            );
        }
    }
    Ok(())
}

/// Warn if config file has overly permissive permissions (on Unix).
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            tracing::warn!(
                "{} has overly permissive permissions ({:o}). Consider running: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}

/// Resolve configuration by applying priority rules.
///
/// Priority order (highest to lowest):
/// 1. CLI flags (`--workspace-dir`)
/// 2. Environment variables (`IPASIGN_WORKSPACE_DIR`, `IPASIGN_OUTPUT_DIR`)
/// 3. Config file
pub fn resolve_config(
    workspace_flag: Option<&Path>,
    file_config: Option<CliConfig>,
) -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    if let Some(config) = file_config {
        resolved.workspace_dir = config.workspace_dir;
        resolved.output_dir = config.output_dir;
        for (name, path) in config.tools {
            let tool = name.parse::<Tool>().map_err(anyhow::Error::msg)?;
            resolved.tool_overrides.push((tool, path));
        }
    }

    if let Some(dir) = env_path(WORKSPACE_DIR_ENV) {
        resolved.workspace_dir = Some(dir);
    }
    if let Some(dir) = env_path(OUTPUT_DIR_ENV) {
        resolved.output_dir = Some(dir);
    }

    if let Some(dir) = workspace_flag {
        resolved.workspace_dir = Some(dir.to_path_buf());
    }

    if let Some(dir) = &resolved.workspace_dir {
        if !dir.is_dir() {
            bail!("Workspace directory {} does not exist", dir.display());
        }
    }

    Ok(resolved)
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
