use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod output;
mod state;

use commands::{
    AppContext,
    config::{ConfigCommands, handle_config_command},
    devices::handle_devices_command,
    identities::{IdentityCommands, handle_identity_command},
    install::{InstallArgs, handle_install_command, handle_install_tool_command},
    profile::handle_profile_command,
    sign::{SignArgs, handle_sign_command},
    tools::handle_tools_command,
};

#[derive(Parser)]
#[command(name = "ipasign", version = ipasign_core::VERSION)]
#[command(about = "Re-sign iOS app archives and install them on devices", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Directory for temporary signing workspaces
    #[arg(long, global = true)]
    workspace_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-sign an app archive with a new identity and provisioning profile
    Sign(SignArgs),

    /// Signing identity management
    #[command(subcommand)]
    Identities(IdentityCommands),

    /// Show a provisioning profile's details
    Profile {
        /// Path to a .mobileprovision file
        path: PathBuf,
    },

    /// List attached devices
    Devices,

    /// Install a signed archive on a device
    Install(InstallArgs),

    /// Install ideviceinstaller with Homebrew
    InstallTool,

    /// Show where each external tool was found
    Tools,

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ipasign_core=debug,ipasign=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (doesn't override existing env vars)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Config commands don't need tools or state
    if let Commands::Config(cmd) = cli.command {
        return handle_config_command(cmd);
    }

    let file_config = config::load_config().unwrap_or_else(|e| {
        output::print_warning(&format!("Failed to load config file: {:#}", e));
        None
    });
    let resolved = config::resolve_config(cli.workspace_dir.as_deref(), file_config)?;
    let mut ctx = AppContext::new(resolved, state::state_path()?);

    match cli.command {
        Commands::Sign(args) => handle_sign_command(args, &mut ctx).await?,
        Commands::Identities(cmd) => handle_identity_command(cmd, &ctx).await?,
        Commands::Profile { path } => handle_profile_command(&path, &ctx).await?,
        Commands::Devices => handle_devices_command(&ctx).await?,
        Commands::Install(args) => handle_install_command(args, &ctx).await?,
        Commands::InstallTool => handle_install_tool_command(&ctx).await?,
        Commands::Tools => handle_tools_command(&ctx)?,
        Commands::Config(_) => unreachable!(), // Handled above
    }

    Ok(())
}
