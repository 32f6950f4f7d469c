//! Re-signing pipeline.
//!
//! A run moves through the [`Stage`]s in order: unpack the archive into a
//! fresh [`Workspace`], locate the app bundle, strip old signatures, embed the
//! new provisioning profile, extract its entitlements, sign nested code before
//! the bundle that contains it, and repackage. Any failure skips straight to
//! workspace cleanup, which runs on every exit path.

pub mod events;
pub mod workspace;

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;

use crate::entitlements::EntitlementsExtractor;
use crate::error::{ResignError, Result};
use crate::identity::SigningIdentity;
use crate::tools::{ArchiveTool, Codesign, SignerTool, SystemArchiveTool, ToolLocator};

pub use events::{ProgressEvent, ProgressSink, Stage};
pub use workspace::{PAYLOAD_DIR, Workspace};

/// Name of the embedded provisioning profile inside a bundle.
pub const EMBEDDED_PROFILE: &str = "embedded.mobileprovision";

const CODE_SIGNATURE_DIR: &str = "_CodeSignature";
const FRAMEWORKS_DIR: &str = "Frameworks";
const PLUGINS_DIR: &str = "PlugIns";

/// Inputs for one signing run.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub archive: PathBuf,
    pub profile: PathBuf,
    pub identity: SigningIdentity,
    /// Destination directory; defaults to the archive's directory.
    pub output_dir: Option<PathBuf>,
}

impl SigningRequest {
    pub fn new(
        archive: impl Into<PathBuf>,
        profile: impl Into<PathBuf>,
        identity: impl Into<SigningIdentity>,
    ) -> Self {
        Self {
            archive: archive.into(),
            profile: profile.into(),
            identity: identity.into(),
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Rejects requests with missing inputs before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        self.validate_inputs()?;
        if self.identity.is_empty() {
            return Err(ResignError::Precondition(
                "No signing identity selected".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks the archive and profile only, for callers that still have to
    /// pick an identity.
    pub fn validate_inputs(&self) -> Result<()> {
        if self.archive.as_os_str().is_empty() {
            return Err(ResignError::Precondition("No archive selected".to_string()));
        }
        if !self.archive.is_file() {
            return Err(ResignError::Precondition(format!(
                "Archive not found: {}",
                self.archive.display()
            )));
        }
        if self.profile.as_os_str().is_empty() {
            return Err(ResignError::Precondition(
                "No provisioning profile selected".to_string(),
            ));
        }
        if !self.profile.is_file() {
            return Err(ResignError::Precondition(format!(
                "Provisioning profile not found: {}",
                self.profile.display()
            )));
        }
        Ok(())
    }

    /// Absolute path of the signed archive: `<stem>-signed.<ext>`.
    pub fn output_path(&self) -> Result<PathBuf> {
        let stem = self
            .archive
            .file_stem()
            .unwrap_or_else(|| OsStr::new("app"));
        let extension = self
            .archive
            .extension()
            .unwrap_or_else(|| OsStr::new("ipa"));

        let mut file_name = stem.to_os_string();
        file_name.push("-signed.");
        file_name.push(extension);

        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => match self.archive.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };

        Ok(std::path::absolute(dir.join(file_name))?)
    }
}

/// A run started in the background with [`SigningPipeline::start`].
#[derive(Debug)]
pub struct SigningRun {
    /// Progress lines, closed when the run ends.
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    /// Resolves to the signed archive path or the failure.
    pub handle: JoinHandle<Result<PathBuf>>,
}

/// Orchestrates re-signing runs. At most one run is active per pipeline.
pub struct SigningPipeline {
    archive: Arc<dyn ArchiveTool>,
    signer: Arc<dyn SignerTool>,
    entitlements: EntitlementsExtractor,
    workspace_root: Option<PathBuf>,
    gate: Arc<Mutex<()>>,
}

impl SigningPipeline {
    pub fn new(
        archive: Arc<dyn ArchiveTool>,
        signer: Arc<dyn SignerTool>,
        entitlements: EntitlementsExtractor,
    ) -> Self {
        Self {
            archive,
            signer,
            entitlements,
            workspace_root: None,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Pipeline backed by the host's archive, signing and profile tools.
    pub fn system(locator: Arc<ToolLocator>) -> Self {
        Self::new(
            Arc::new(SystemArchiveTool::new(Arc::clone(&locator))),
            Arc::new(Codesign::new(Arc::clone(&locator))),
            EntitlementsExtractor::system(locator),
        )
    }

    /// Creates workspaces under `root` instead of the system temp directory.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    fn acquire_gate(&self) -> Result<OwnedMutexGuard<()>> {
        Arc::clone(&self.gate).try_lock_owned().map_err(|_| {
            ResignError::Precondition("A signing run is already in progress".to_string())
        })
    }

    /// Runs the pipeline to completion on the current task.
    pub async fn run(&self, request: &SigningRequest, progress: &ProgressSink) -> Result<PathBuf> {
        let _gate = self.acquire_gate()?;
        self.execute(request, progress).await
    }

    /// Starts a run on a background task.
    ///
    /// The gate is taken before returning, so a second call while this run is
    /// in flight fails with [`ResignError::Precondition`].
    pub fn start(self: &Arc<Self>, request: SigningRequest) -> Result<SigningRun> {
        let gate = self.acquire_gate()?;
        let (progress, events) = ProgressSink::channel();
        let pipeline = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let _gate = gate;
            pipeline.execute(&request, &progress).await
        });

        Ok(SigningRun { events, handle })
    }

    async fn execute(&self, request: &SigningRequest, progress: &ProgressSink) -> Result<PathBuf> {
        request.validate()?;

        let workspace = Workspace::acquire(self.workspace_root.as_deref())?;
        progress.emit(
            Stage::AcquireWorkspace,
            format!("Created workspace {}", workspace.path().display()),
        );

        let result = self.run_stages(request, &workspace, progress).await;
        workspace.close().await;

        match &result {
            Ok(output) => tracing::info!("Signed archive written to {}", output.display()),
            Err(e) => tracing::warn!("Signing failed: {}", e),
        }
        result
    }

    async fn run_stages(
        &self,
        request: &SigningRequest,
        workspace: &Workspace,
        progress: &ProgressSink,
    ) -> Result<PathBuf> {
        let archive_size = tokio::fs::metadata(&request.archive)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        self.archive
            .extract(&request.archive, workspace.path())
            .await?;
        progress.emit(
            Stage::Extract,
            format!(
                "Extracted {} ({:.1} MB)",
                display_name(&request.archive),
                archive_size as f64 / (1024.0 * 1024.0)
            ),
        );

        let app = locate_app_bundle(&workspace.payload_dir()).await?;
        progress.emit(
            Stage::LocateBundle,
            format!("Found app bundle {}", display_name(&app)),
        );

        let extensions = bundle_entries(&app.join(PLUGINS_DIR), Some("appex")).await?;
        remove_signature(&app).await?;
        for extension in &extensions {
            remove_signature(extension).await?;
        }
        progress.emit(Stage::StripSignatures, "Removed existing signatures");

        embed_profile(&request.profile, &app).await?;
        for extension in &extensions {
            embed_profile(&request.profile, extension).await?;
        }
        progress.emit(
            Stage::InjectProfile,
            format!(
                "Embedded provisioning profile in {} bundle(s)",
                extensions.len() + 1
            ),
        );

        let entitlements = self
            .entitlements
            .extract_entitlements(&app.join(EMBEDDED_PROFILE), workspace.path())
            .await?;
        progress.emit(Stage::ExtractEntitlements, "Extracted entitlements");

        // Nested code first: a container's signature seals the signatures of
        // everything inside it.
        let frameworks = bundle_entries(&app.join(FRAMEWORKS_DIR), None).await?;
        for framework in &frameworks {
            self.signer.sign(framework, &request.identity, None).await?;
        }
        for extension in &extensions {
            self.signer
                .sign(extension, &request.identity, Some(&entitlements))
                .await?;
        }
        progress.emit(
            Stage::SignNestedCode,
            format!(
                "Signed {} framework(s) and {} extension(s)",
                frameworks.len(),
                extensions.len()
            ),
        );

        self.signer
            .sign(&app, &request.identity, Some(&entitlements))
            .await?;
        progress.emit(
            Stage::SignMainBundle,
            format!("Signed {}", display_name(&app)),
        );

        let output = request.output_path()?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::remove_file(&output).await {
            Ok(()) => tracing::debug!("Removed stale {}", output.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.archive
            .create(workspace.path(), PAYLOAD_DIR, &output)
            .await?;
        progress.emit(Stage::Repackage, format!("Wrote {}", output.display()));

        Ok(output)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Finds the `.app` directory directly under `payload`.
pub async fn locate_app_bundle(payload: &Path) -> Result<PathBuf> {
    let mut apps = Vec::new();
    let mut entries = match tokio::fs::read_dir(payload).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ResignError::BundleNotFound(payload.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension() == Some(OsStr::new("app")) && entry.file_type().await?.is_dir() {
            apps.push(path);
        }
    }
    apps.sort();

    if apps.len() > 1 {
        tracing::warn!(
            "Found {} app bundles under {}, using {}",
            apps.len(),
            payload.display(),
            apps[0].display()
        );
    }

    apps.into_iter()
        .next()
        .ok_or_else(|| ResignError::BundleNotFound(payload.to_path_buf()))
}

/// Sorted, non-hidden entries of `dir`, optionally filtered by extension.
/// A missing directory has no entries.
async fn bundle_entries(dir: &Path, extension: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if let Some(ext) = extension {
            if path.extension() != Some(OsStr::new(ext)) {
                continue;
            }
        }
        found.push(path);
    }
    found.sort();
    Ok(found)
}

async fn remove_signature(bundle: &Path) -> Result<()> {
    let signature = bundle.join(CODE_SIGNATURE_DIR);
    let metadata = match tokio::fs::symlink_metadata(&signature).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(&signature).await?;
    } else {
        tokio::fs::remove_file(&signature).await?;
    }
    tracing::debug!("Removed {}", signature.display());
    Ok(())
}

async fn embed_profile(profile: &Path, bundle: &Path) -> Result<()> {
    let target = bundle.join(EMBEDDED_PROFILE);
    match tokio::fs::remove_file(&target).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::copy(profile, &target).await?;
    Ok(())
}
