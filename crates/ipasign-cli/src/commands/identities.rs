//! `ipasign identities` commands for keychain signing identities.

use anyhow::Result;
use clap::Subcommand;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use ipasign_core::identity::IdentityRegistry;

use super::AppContext;
use crate::output::{print_hint, print_info, print_success};

#[derive(Subcommand)]
pub enum IdentityCommands {
    /// List code-signing identities in the keychain
    List,

    /// Import a certificate (.cer) or identity (.p12) into the keychain
    Import {
        /// Certificate file
        file: PathBuf,

        /// Password for a .p12 file
        #[arg(long, env = "IPASIGN_P12_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

pub async fn handle_identity_command(cmd: IdentityCommands, ctx: &AppContext) -> Result<()> {
    let registry = IdentityRegistry::new(Arc::clone(&ctx.locator));
    match cmd {
        IdentityCommands::List => list_identities(&registry, ctx).await,
        IdentityCommands::Import { file, password } => {
            registry
                .import_certificate(&file, password.as_deref())
                .await?;
            print_success(&format!("Imported {}", file.display()));
            Ok(())
        }
    }
}

async fn list_identities(registry: &IdentityRegistry, ctx: &AppContext) -> Result<()> {
    let identities = registry.list_signing_identities().await;

    if identities.is_empty() {
        print_info("No signing identities found.");
        print_hint("Import one with 'ipasign identities import <file.p12>'.");
        return Ok(());
    }

    for (i, identity) in identities.iter().enumerate() {
        let last_used = ctx.state.identity.as_deref() == Some(identity.as_str());
        let marker = if last_used {
            style(" (last used)").dim().to_string()
        } else {
            String::new()
        };
        println!("{:>3}) {}{}", i + 1, identity, marker);
    }

    Ok(())
}
