//! `ipasign devices`: list attached devices.

use anyhow::Result;
use console::style;
use std::sync::Arc;

use ipasign_core::device::{DeviceRegistry, default_selection};

use super::AppContext;
use crate::output::{print_hint, print_info};

pub async fn handle_devices_command(ctx: &AppContext) -> Result<()> {
    let registry = DeviceRegistry::system(Arc::clone(&ctx.locator));
    let devices = registry.list_devices().await;

    if devices.is_empty() {
        print_info("No devices attached.");
        print_hint("Connect a device over USB and unlock it.");
        return Ok(());
    }

    let selected = default_selection(&devices).map(|d| d.id.clone());
    for device in &devices {
        let marker = if selected.as_deref() == Some(device.id.as_str()) {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<28} {} {}",
            marker,
            device.name,
            device.id,
            style(format!("[{}]", device.source)).dim()
        );
    }

    if selected.is_some() {
        println!();
        print_hint("* = default target for 'ipasign install'");
    }

    Ok(())
}
