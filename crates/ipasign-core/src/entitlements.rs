//! Entitlement extraction from provisioning profiles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ResignError, Result};
use crate::tools::{
    PlistQuery, ProfileDecoder, SystemPlistQuery, SystemProfileDecoder, ToolLocator,
};

/// File name of the decoded profile inside the output directory.
pub const DECODED_PROFILE_FILE: &str = "profile.plist";
/// File name of the extracted entitlements inside the output directory.
pub const ENTITLEMENTS_FILE: &str = "entitlements.plist";

const ENTITLEMENTS_KEY: &str = "Entitlements";

/// Sequences profile decoding and entitlement extraction.
///
/// Parsing is left to the delegated tools; this type only orders the two
/// steps and translates their failures.
#[derive(Clone)]
pub struct EntitlementsExtractor {
    decoder: Arc<dyn ProfileDecoder>,
    query: Arc<dyn PlistQuery>,
}

impl EntitlementsExtractor {
    pub fn new(decoder: Arc<dyn ProfileDecoder>, query: Arc<dyn PlistQuery>) -> Self {
        Self { decoder, query }
    }

    /// Extractor backed by the host's profile decoder and plist tooling.
    pub fn system(locator: Arc<ToolLocator>) -> Self {
        Self::new(
            Arc::new(SystemProfileDecoder::new(Arc::clone(&locator))),
            Arc::new(SystemPlistQuery::new(locator)),
        )
    }

    /// Decodes `profile` into `work_dir` and writes its `Entitlements`
    /// dictionary to a standalone plist, returning that file's path.
    pub async fn extract_entitlements(&self, profile: &Path, work_dir: &Path) -> Result<PathBuf> {
        let decoded = work_dir.join(DECODED_PROFILE_FILE);
        let entitlements = work_dir.join(ENTITLEMENTS_FILE);

        self.decoder
            .decode(profile, &decoded)
            .await
            .map_err(|e| match e {
                ResignError::ToolMissing { .. } => e,
                other => ResignError::ProfileDecodeFailure(other.to_string()),
            })?;

        self.query
            .extract_key(&decoded, ENTITLEMENTS_KEY, &entitlements)
            .await
            .map_err(|e| match e {
                ResignError::ToolMissing { .. } => e,
                other => ResignError::EntitlementsExtractionFailure(other.to_string()),
            })?;

        tracing::debug!("Extracted entitlements to {}", entitlements.display());
        Ok(entitlements)
    }
}
