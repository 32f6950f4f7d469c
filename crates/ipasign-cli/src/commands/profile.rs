//! `ipasign profile`: show what a provisioning profile grants.

use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;
use std::path::Path;
use std::sync::Arc;

use ipasign_core::profile::{ProfileSummary, inspect_profile};
use ipasign_core::tools::SystemProfileDecoder;

use super::AppContext;
use crate::output::{print_key_value, print_section};

pub async fn handle_profile_command(path: &Path, ctx: &AppContext) -> Result<()> {
    let decoder = SystemProfileDecoder::new(Arc::clone(&ctx.locator));
    let summary = inspect_profile(&decoder, path).await?;
    print_summary(&summary, Utc::now());
    Ok(())
}

fn print_summary(summary: &ProfileSummary, now: DateTime<Utc>) {
    print_section(&summary.name);
    print_key_value("UUID", summary.uuid.as_deref().unwrap_or("-"));
    print_key_value("Team", summary.team_id.as_deref().unwrap_or("-"));
    print_key_value(
        "App ID",
        summary.application_identifier.as_deref().unwrap_or("-"),
    );
    print_key_value("Expires", &expiry_label(summary, now));
    print_key_value("Devices", &summary.provisioned_devices.to_string());
    print_key_value(
        "Debuggable",
        if summary.get_task_allow { "yes" } else { "no" },
    );
}

fn expiry_label(summary: &ProfileSummary, now: DateTime<Utc>) -> String {
    let Some(expires) = summary.expires_at else {
        return "-".to_string();
    };

    let date = expires.format("%Y-%m-%d %H:%M UTC").to_string();
    if summary.is_expired_at(now) {
        format!("{} {}", date, style("(expired)").red())
    } else {
        let days = (expires - now).num_days();
        format!("{} ({} days left)", date, days)
    }
}
