//! `ipasign install` and `ipasign install-tool`.

use anyhow::{Result, bail};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipasign_core::device::{Device, DeviceRegistry, default_selection};
use ipasign_core::installer::{DeviceInstaller, INSTALLER_PACKAGE};

use super::AppContext;
use crate::output::{print_hint, print_info, print_success, print_warning, spinner};

#[derive(Args, Debug, Default)]
pub struct InstallArgs {
    /// Signed archive to install (defaults to the last signed archive)
    #[arg(long)]
    pub ipa: Option<PathBuf>,

    /// Device identifier (defaults to the only attached device)
    #[arg(long)]
    pub device: Option<String>,
}

pub async fn handle_install_command(args: InstallArgs, ctx: &AppContext) -> Result<()> {
    let installer = DeviceInstaller::system(Arc::clone(&ctx.locator));
    if !installer.has_install_tool() {
        print_warning(&format!(
            "{} was not found in the usual locations; trying the login shell's PATH.",
            INSTALLER_PACKAGE
        ));
        print_hint("Run 'ipasign install-tool' to install it.");
    }

    let artifact = args
        .ipa
        .or_else(|| ctx.state.restorable_output().map(Path::to_path_buf));
    DeviceInstaller::check_artifact(artifact.as_deref())?;

    let device_id = match args.device {
        Some(id) => id,
        None => {
            let devices = DeviceRegistry::system(Arc::clone(&ctx.locator))
                .list_devices()
                .await;
            pick_device(&devices)?
        }
    };

    let progress = spinner(&format!("Installing on {}...", device_id));
    let result = installer.install(artifact.as_deref(), &device_id).await;
    progress.finish_and_clear();
    result?;

    print_success(&format!("Installed on {}", device_id));
    Ok(())
}

pub async fn handle_install_tool_command(ctx: &AppContext) -> Result<()> {
    let installer = DeviceInstaller::system(Arc::clone(&ctx.locator));
    if installer.has_install_tool() {
        print_info(&format!("{} is already installed.", INSTALLER_PACKAGE));
        return Ok(());
    }

    let progress = spinner(&format!("brew install {}...", INSTALLER_PACKAGE));
    let result = installer.install_tool().await;
    progress.finish_and_clear();

    if let Err(e) = result {
        if !e.is_fatal() {
            print_warning(&e.to_string());
            return Ok(());
        }
        return Err(e.into());
    }

    print_success(&format!("Installed {}", INSTALLER_PACKAGE));
    Ok(())
}

fn pick_device(devices: &[Device]) -> Result<String> {
    if let Some(device) = default_selection(devices) {
        return Ok(device.id.clone());
    }
    if devices.is_empty() {
        bail!("No devices attached. Connect a device and unlock it.");
    }

    let listing: Vec<String> = devices
        .iter()
        .map(|d| format!("  {} ({})", d.id, d.name))
        .collect();
    bail!(
        "{} devices attached. Choose one with --device:\n{}",
        devices.len(),
        listing.join("\n")
    )
}
