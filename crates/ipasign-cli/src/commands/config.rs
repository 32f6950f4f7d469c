//! `ipasign config` commands for managing CLI configuration.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::fs;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::config::{CONFIG_ENV, CliConfig, config_path, load_config};
use crate::output::print_key_value;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create a config file with default settings
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show,

    /// Show config file path
    Path,
}

pub fn handle_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => init_config(force),
        ConfigCommands::Show => show_config(),
        ConfigCommands::Path => show_path(),
    }
}

fn init_config(force: bool) -> Result<()> {
    let path = config_path()?;

    if path.exists() && !force {
        bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            #[cfg(unix)]
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }
    }

    write_config(&path, &CliConfig::default())?;

    println!("Created config file at {}", path.display());
    println!();
    println!("To pin a tool location, add it under 'tools::', e.g.");
    println!("  tools::");
    println!("    ideviceinstaller: \"/opt/homebrew/bin/ideviceinstaller\"");

    Ok(())
}

fn show_config() -> Result<()> {
    let path = config_path()?;

    let Some(config) = load_config()? else {
        println!("No config file found at {}", path.display());
        println!();
        println!("Using defaults. Run 'ipasign config init' to create a config file.");
        return Ok(());
    };

    print_key_value("Config file", &path.display().to_string());
    print_key_value(
        "Workspace dir",
        &display_or_default(config.workspace_dir.as_deref(), "system temp"),
    );
    print_key_value(
        "Output dir",
        &display_or_default(config.output_dir.as_deref(), "next to archive"),
    );

    if config.tools.is_empty() {
        print_key_value("Tools", "(built-in locations)");
    } else {
        println!("Tools:");
        for (name, tool_path) in &config.tools {
            println!("  {:<18}{}", name, tool_path.display());
        }
    }

    Ok(())
}

fn display_or_default(path: Option<&Path>, default: &str) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| format!("({})", default))
}

fn show_path() -> Result<()> {
    let path = config_path()?;
    println!("{}", path.display());

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        println!();
        println!("Note: {} is set to: {}", CONFIG_ENV, env_path);
    }

    Ok(())
}

/// Write config to file with HUML formatting and owner-only permissions.
fn write_config(path: &Path, config: &CliConfig) -> Result<()> {
    let content = serialize_to_huml(config);

    fs::write(path, &content).with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Serialize config to HUML by hand; huml-rs only deserializes.
fn serialize_to_huml(config: &CliConfig) -> String {
    let mut output = String::new();

    output.push_str("%HUML v0.2.0\n");
    match &config.workspace_dir {
        Some(dir) => output.push_str(&format!("workspace_dir: {}\n", quote(&dir.to_string_lossy()))),
        None => output.push_str("# workspace_dir: \"/path/to/scratch\"\n"),
    }
    match &config.output_dir {
        Some(dir) => output.push_str(&format!("output_dir: {}\n", quote(&dir.to_string_lossy()))),
        None => output.push_str("# output_dir: \"/path/to/signed\"\n"),
    }

    if !config.tools.is_empty() {
        output.push('\n');
        output.push_str("tools::\n");
        for (name, path) in &config.tools {
            output.push_str(&format!("  {}: {}\n", name, quote(&path.to_string_lossy())));
        }
    }

    output
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
