//! Provisioning profile inspection.
//!
//! The profile is decoded with the same [`ProfileDecoder`] the pipeline uses,
//! then the resulting plist is read with the `plist` crate for display.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ResignError, Result};
use crate::tools::ProfileDecoder;

/// Human-relevant fields of a provisioning profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub name: String,
    pub uuid: Option<String>,
    pub team_id: Option<String>,
    /// `application-identifier` entitlement, team prefix included.
    pub application_identifier: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provisioned_devices: usize,
    pub get_task_allow: bool,
}

impl ProfileSummary {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Decodes `profile` in a scratch directory and summarizes it.
pub async fn inspect_profile(decoder: &dyn ProfileDecoder, profile: &Path) -> Result<ProfileSummary> {
    let scratch = tempfile::Builder::new()
        .prefix("ipasign-profile-")
        .tempdir()
        .map_err(|e| ResignError::Workspace(format!("Failed to create temp directory: {}", e)))?;
    let decoded = scratch.path().join("profile.plist");

    decoder
        .decode(profile, &decoded)
        .await
        .map_err(|e| match e {
            ResignError::ToolMissing { .. } => e,
            other => ResignError::ProfileDecodeFailure(other.to_string()),
        })?;

    let bytes = tokio::fs::read(&decoded).await?;
    summarize_profile_plist(&bytes)
}

/// Reads summary fields from a decoded profile plist.
pub fn summarize_profile_plist(bytes: &[u8]) -> Result<ProfileSummary> {
    let value: plist::Value = plist::from_bytes(bytes)
        .map_err(|e| ResignError::ProfileDecodeFailure(format!("Invalid profile plist: {}", e)))?;
    let dict = value.as_dictionary().ok_or_else(|| {
        ResignError::ProfileDecodeFailure("Profile plist is not a dictionary".to_string())
    })?;

    let string = |key: &str| {
        dict.get(key)
            .and_then(|v| v.as_string())
            .map(|s| s.to_string())
    };

    let entitlements = dict.get("Entitlements").and_then(|v| v.as_dictionary());

    let expires_at = dict.get("ExpirationDate").and_then(|v| v.as_date()).and_then(|d| {
        let system_time: SystemTime = d.into();
        system_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .ok()
            .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, 0))
    });

    Ok(ProfileSummary {
        name: string("Name").unwrap_or_else(|| "Unnamed Profile".to_string()),
        uuid: string("UUID"),
        team_id: dict
            .get("TeamIdentifier")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_string())
            .map(|s| s.to_string()),
        application_identifier: entitlements
            .and_then(|e| e.get("application-identifier"))
            .and_then(|v| v.as_string())
            .map(|s| s.to_string()),
        expires_at,
        provisioned_devices: dict
            .get("ProvisionedDevices")
            .and_then(|v| v.as_array())
            .map(|arr| arr.len())
            .unwrap_or(0),
        get_task_allow: entitlements
            .and_then(|e| e.get("get-task-allow"))
            .and_then(|v| v.as_boolean())
            .unwrap_or(false),
    })
}
