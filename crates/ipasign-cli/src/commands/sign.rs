//! `ipasign sign`: re-sign an app archive.

use anyhow::{Context, Result, bail};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipasign_core::identity::{IdentityRegistry, SigningIdentity};
use ipasign_core::pipeline::{SigningPipeline, SigningRequest, Stage};
use ipasign_core::profile::inspect_profile;
use ipasign_core::tools::SystemProfileDecoder;

use super::AppContext;
use crate::output::{print_hint, print_success, print_warning, spinner};

#[derive(Args, Debug, Default)]
pub struct SignArgs {
    /// App archive to re-sign (defaults to the last one used)
    #[arg(long)]
    pub ipa: Option<PathBuf>,

    /// Provisioning profile to embed (defaults to the last one used)
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Signing identity name, as shown by `ipasign identities list`
    #[arg(long)]
    pub identity: Option<String>,

    /// Directory for the signed archive (defaults to the archive's directory)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

pub async fn handle_sign_command(args: SignArgs, ctx: &mut AppContext) -> Result<()> {
    let named = args
        .identity
        .clone()
        .or_else(|| ctx.state.identity.clone())
        .map(SigningIdentity::new);

    // Archive and profile are checked before any tool runs
    let placeholder = named.clone().unwrap_or_else(|| SigningIdentity::new(""));
    let mut request = build_request(args, placeholder, ctx)?;
    request.validate_inputs()?;

    if named.is_none() {
        let registry = IdentityRegistry::new(Arc::clone(&ctx.locator));
        request.identity = single_identity(registry.list_signing_identities().await)?;
    }
    request.validate()?;

    warn_if_profile_expired(ctx, &request.profile).await;

    let mut pipeline = SigningPipeline::system(Arc::clone(&ctx.locator));
    if let Some(root) = &ctx.config.workspace_dir {
        pipeline = pipeline.with_workspace_root(root);
    }
    let pipeline = Arc::new(pipeline);

    let mut run = pipeline.start(request.clone())?;
    let progress = spinner("Preparing workspace...");
    while let Some(event) = run.events.recv().await {
        progress.println(event.to_string());
        if let Some(next) = Stage::ALL.get(event.stage.number()) {
            progress.set_message(format!("{}...", stage_label(*next)));
        }
    }
    progress.finish_and_clear();

    let output = run.handle.await.context("Signing task panicked")??;

    ctx.state.record_sign(&request, &output);
    ctx.save_state();

    println!();
    print_success(&format!("Signed archive: {}", output.display()));
    print_hint("Run 'ipasign install' to install it on an attached device.");
    Ok(())
}

/// Uses the only available identity when none was named.
fn single_identity(mut identities: Vec<SigningIdentity>) -> Result<SigningIdentity> {
    match identities.len() {
        0 => bail!(
            "No signing identities found. Import a certificate with 'ipasign identities import <file>'."
        ),
        1 => Ok(identities.remove(0)),
        n => bail!(
            "{} signing identities found. Choose one with --identity (see 'ipasign identities list').",
            n
        ),
    }
}

async fn warn_if_profile_expired(ctx: &AppContext, profile: &Path) {
    let decoder = SystemProfileDecoder::new(Arc::clone(&ctx.locator));
    match inspect_profile(&decoder, profile).await {
        Ok(summary) if summary.is_expired() => {
            let expired = summary
                .expires_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            print_warning(&format!(
                "Provisioning profile '{}' expired on {}. The signed app will not launch.",
                summary.name, expired
            ));
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Could not inspect {}: {}", profile.display(), e),
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::AcquireWorkspace => "Preparing workspace",
        Stage::Extract => "Extracting archive",
        Stage::LocateBundle => "Locating app bundle",
        Stage::StripSignatures => "Removing signatures",
        Stage::InjectProfile => "Embedding provisioning profile",
        Stage::ExtractEntitlements => "Extracting entitlements",
        Stage::SignNestedCode => "Signing frameworks and extensions",
        Stage::SignMainBundle => "Signing app bundle",
        Stage::Repackage => "Compressing signed archive",
    }
}
