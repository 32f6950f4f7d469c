//! End-to-end pipeline runs against fake archive, signing and decoding tools.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use ipasign_core::entitlements::EntitlementsExtractor;
use ipasign_core::identity::SigningIdentity;
use ipasign_core::pipeline::{ProgressSink, SigningPipeline, SigningRequest, Stage};
use ipasign_core::tools::{ArchiveTool, NativePlistQuery, ProfileDecoder, SignerTool};
use ipasign_core::{ResignError, Result};

const IDENTITY: &str = "Apple Development: J. Doe (TEAMID)";

#[derive(Clone, Default)]
struct Layout {
    app: Option<&'static str>,
    frameworks: Vec<&'static str>,
    extensions: Vec<&'static str>,
}

impl Layout {
    fn app(name: &'static str) -> Self {
        Self {
            app: Some(name),
            ..Default::default()
        }
    }

    fn framework(mut self, name: &'static str) -> Self {
        self.frameworks.push(name);
        self
    }

    fn extension(mut self, name: &'static str) -> Self {
        self.extensions.push(name);
        self
    }

    fn materialize(&self, dest: &Path) {
        let payload = dest.join("Payload");
        std::fs::create_dir_all(&payload).unwrap();
        let Some(app) = self.app else {
            std::fs::write(payload.join("README"), b"no bundle here").unwrap();
            return;
        };

        let app = payload.join(app);
        seed_bundle(&app);
        for framework in &self.frameworks {
            let dir = app.join("Frameworks").join(framework);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("binary"), b"framework").unwrap();
        }
        for extension in &self.extensions {
            seed_bundle(&app.join("PlugIns").join(extension));
        }
    }
}

fn seed_bundle(dir: &Path) {
    std::fs::create_dir_all(dir.join("_CodeSignature")).unwrap();
    std::fs::write(dir.join("_CodeSignature/CodeResources"), b"original").unwrap();
    std::fs::write(dir.join("embedded.mobileprovision"), b"stale profile").unwrap();
    std::fs::write(dir.join("binary"), b"executable").unwrap();
}

fn tool_failure(tool: &str, output: &str) -> ResignError {
    ResignError::ExternalToolFailure {
        tool: tool.to_string(),
        exit_code: 1,
        output: output.to_string(),
    }
}

#[derive(Default)]
struct FakeArchive {
    layout: Layout,
    fail_extract: bool,
    fail_create: bool,
    hold: Option<Arc<Notify>>,
    extracted: AtomicUsize,
    /// Files under `Payload/` at repackaging time, keyed by relative path.
    packed: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FakeArchive {
    fn new(layout: Layout) -> Self {
        Self {
            layout,
            ..Default::default()
        }
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            let relative = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
            out.insert(relative, std::fs::read(&path).unwrap());
        }
    }
}

#[async_trait]
impl ArchiveTool for FakeArchive {
    async fn extract(&self, _archive: &Path, dest: &Path) -> Result<()> {
        self.extracted.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if self.fail_extract {
            return Err(tool_failure("unzip", "End-of-central-directory signature not found"));
        }
        self.layout.materialize(dest);
        Ok(())
    }

    async fn create(&self, base_dir: &Path, entry: &str, output: &Path) -> Result<()> {
        if self.fail_create {
            return Err(tool_failure("zip", "zip I/O error: No space left on device"));
        }
        if output.exists() {
            return Err(tool_failure("zip", "refusing to append to an existing archive"));
        }

        let mut files = BTreeMap::new();
        collect_files(base_dir, &base_dir.join(entry), &mut files);
        let listing: Vec<&str> = files.keys().map(String::as_str).collect();
        std::fs::write(output, listing.join("\n"))?;
        *self.packed.lock().unwrap() = files;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SignCall {
    target: String,
    identity: SigningIdentity,
    application_identifier: Option<String>,
    had_original_signature: bool,
}

#[derive(Default)]
struct FakeSigner {
    calls: Mutex<Vec<SignCall>>,
    fail_on: Option<&'static str>,
}

impl FakeSigner {
    fn order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.target.clone())
            .collect()
    }
}

#[async_trait]
impl SignerTool for FakeSigner {
    async fn sign(
        &self,
        target: &Path,
        identity: &SigningIdentity,
        entitlements: Option<&Path>,
    ) -> Result<()> {
        let name = target.file_name().unwrap().to_string_lossy().into_owned();
        let signature = target.join("_CodeSignature/CodeResources");
        let application_identifier = entitlements.map(|path| {
            let value = plist::Value::from_file(path).unwrap();
            value
                .as_dictionary()
                .and_then(|d| d.get("application-identifier"))
                .and_then(|v| v.as_string())
                .unwrap_or_default()
                .to_string()
        });

        self.calls.lock().unwrap().push(SignCall {
            target: name.clone(),
            identity: identity.clone(),
            application_identifier,
            had_original_signature: std::fs::read(&signature)
                .map(|b| b == b"original")
                .unwrap_or(false),
        });

        if self.fail_on == Some(name.as_str()) {
            return Err(tool_failure("codesign", "errSecInternalComponent"));
        }
        std::fs::create_dir_all(target.join("_CodeSignature"))?;
        std::fs::write(signature, b"signed")?;
        Ok(())
    }
}

/// Test profiles are stored already decoded.
struct CopyDecoder;

#[async_trait]
impl ProfileDecoder for CopyDecoder {
    async fn decode(&self, profile: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(profile, output).await?;
        Ok(())
    }
}

/// Decoder that fails the way `security cms -D` does on a damaged profile.
struct FailingDecoder;

#[async_trait]
impl ProfileDecoder for FailingDecoder {
    async fn decode(&self, _profile: &Path, _output: &Path) -> Result<()> {
        Err(tool_failure("security", "security: failed to decode message"))
    }
}

struct Harness {
    inputs: TempDir,
    workspaces: TempDir,
    archive: PathBuf,
    profile: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let inputs = tempfile::tempdir().unwrap();
        let workspaces = tempfile::tempdir().unwrap();

        let archive = inputs.path().join("App.ipa");
        std::fs::write(&archive, vec![0u8; 4096]).unwrap();

        let profile = inputs.path().join("Dev.mobileprovision");
        let mut entitlements = plist::Dictionary::new();
        entitlements.insert(
            "application-identifier".to_string(),
            plist::Value::String("ABC.com.x.y".to_string()),
        );
        let mut root = plist::Dictionary::new();
        root.insert("Name".to_string(), plist::Value::String("Dev".to_string()));
        root.insert(
            "Entitlements".to_string(),
            plist::Value::Dictionary(entitlements),
        );
        plist::Value::Dictionary(root).to_file_xml(&profile).unwrap();

        Self {
            inputs,
            workspaces,
            archive,
            profile,
        }
    }

    fn request(&self) -> SigningRequest {
        SigningRequest::new(&self.archive, &self.profile, IDENTITY)
    }

    fn pipeline(&self, archive: Arc<FakeArchive>, signer: Arc<FakeSigner>) -> SigningPipeline {
        self.pipeline_with_decoder(archive, signer, Arc::new(CopyDecoder))
    }

    fn pipeline_with_decoder(
        &self,
        archive: Arc<FakeArchive>,
        signer: Arc<FakeSigner>,
        decoder: Arc<dyn ProfileDecoder>,
    ) -> SigningPipeline {
        SigningPipeline::new(
            archive,
            signer,
            EntitlementsExtractor::new(decoder, Arc::new(NativePlistQuery)),
        )
        .with_workspace_root(self.workspaces.path())
    }

    fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.workspaces.path()).unwrap().count()
    }
}

#[tokio::test]
async fn test_nested_code_signed_before_containers() {
    let harness = Harness::new();
    let layout = Layout::app("App.app")
        .framework("Lib.framework")
        .framework("Alpha.framework")
        .framework("libswiftCore.dylib")
        .extension("Widget.appex");
    let archive = Arc::new(FakeArchive::new(layout));
    let signer = Arc::new(FakeSigner::default());

    harness
        .pipeline(archive, Arc::clone(&signer))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap();

    assert_eq!(
        signer.order(),
        vec![
            "Alpha.framework",
            "Lib.framework",
            "libswiftCore.dylib",
            "Widget.appex",
            "App.app"
        ]
    );

    let calls = signer.calls.lock().unwrap();
    for call in calls.iter() {
        assert_eq!(call.identity.as_str(), IDENTITY);
        assert!(!call.had_original_signature, "{} kept its old signature", call.target);
        if call.target.ends_with(".appex") || call.target.ends_with(".app") {
            assert_eq!(call.application_identifier.as_deref(), Some("ABC.com.x.y"));
        } else {
            assert_eq!(call.application_identifier, None);
        }
    }
}

#[tokio::test]
async fn test_embedded_profiles_match_supplied_profile() {
    let harness = Harness::new();
    let layout = Layout::app("App.app")
        .extension("Share.appex")
        .extension("Widget.appex");
    let archive = Arc::new(FakeArchive::new(layout));

    harness
        .pipeline(Arc::clone(&archive), Arc::new(FakeSigner::default()))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap();

    let expected = std::fs::read(&harness.profile).unwrap();
    let packed = archive.packed.lock().unwrap();
    let embedded: Vec<&String> = packed
        .keys()
        .filter(|k| k.ends_with("embedded.mobileprovision"))
        .collect();

    assert_eq!(embedded.len(), 3);
    for key in embedded {
        assert!(key.starts_with("Payload/App.app"), "unexpected entry {}", key);
        assert_eq!(packed[key], expected, "{} differs from the profile", key);
    }
}

#[tokio::test]
async fn test_rerun_replaces_previous_output() {
    let harness = Harness::new();
    let out_dir = harness.inputs.path().join("signed");

    for _ in 0..2 {
        let archive = Arc::new(FakeArchive::new(Layout::app("App.app")));
        harness
            .pipeline(archive, Arc::new(FakeSigner::default()))
            .run(
                &harness.request().with_output_dir(&out_dir),
                &ProgressSink::discard(),
            )
            .await
            .unwrap();
    }

    let outputs: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(outputs, vec!["App-signed.ipa"]);
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_workspace_removed_after_extract_failure() {
    let harness = Harness::new();
    let archive = Arc::new(FakeArchive {
        fail_extract: true,
        ..FakeArchive::new(Layout::app("App.app"))
    });

    let err = harness
        .pipeline(archive, Arc::new(FakeSigner::default()))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::ExternalToolFailure { ref tool, .. } if tool == "unzip"));
    assert!(err.to_string().contains("End-of-central-directory"));
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_workspace_removed_after_missing_bundle() {
    let harness = Harness::new();
    let archive = Arc::new(FakeArchive::new(Layout::default()));
    let signer = Arc::new(FakeSigner::default());

    let err = harness
        .pipeline(archive, Arc::clone(&signer))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::BundleNotFound(_)));
    assert!(signer.order().is_empty());
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_workspace_removed_after_signing_failure() {
    let harness = Harness::new();
    let layout = Layout::app("App.app")
        .framework("Lib.framework")
        .extension("Widget.appex");
    let archive = Arc::new(FakeArchive::new(layout));
    let signer = Arc::new(FakeSigner {
        fail_on: Some("Widget.appex"),
        ..Default::default()
    });

    let err = harness
        .pipeline(Arc::clone(&archive), Arc::clone(&signer))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::ExternalToolFailure { ref tool, .. } if tool == "codesign"));
    // The container is never signed after a nested failure
    assert_eq!(signer.order(), vec!["Lib.framework", "Widget.appex"]);
    assert!(archive.packed.lock().unwrap().is_empty());
    assert!(!harness.inputs.path().join("App-signed.ipa").exists());
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_workspace_removed_after_repackage_failure() {
    let harness = Harness::new();
    let archive = Arc::new(FakeArchive {
        fail_create: true,
        ..FakeArchive::new(Layout::app("App.app"))
    });

    let err = harness
        .pipeline(archive, Arc::new(FakeSigner::default()))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::ExternalToolFailure { ref tool, .. } if tool == "zip"));
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_workspace_removed_after_profile_decode_failure() {
    let harness = Harness::new();
    let archive = Arc::new(FakeArchive::new(
        Layout::app("App.app").framework("Lib.framework"),
    ));
    let signer = Arc::new(FakeSigner::default());

    let err = harness
        .pipeline_with_decoder(
            Arc::clone(&archive),
            Arc::clone(&signer),
            Arc::new(FailingDecoder),
        )
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::ProfileDecodeFailure(_)));
    assert!(err.to_string().contains("failed to decode message"));
    assert!(signer.order().is_empty());
    assert!(archive.packed.lock().unwrap().is_empty());
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_workspace_removed_after_entitlements_failure() {
    let harness = Harness::new();
    let mut root = plist::Dictionary::new();
    root.insert("Name".to_string(), plist::Value::String("Dev".to_string()));
    plist::Value::Dictionary(root)
        .to_file_xml(&harness.profile)
        .unwrap();

    let archive = Arc::new(FakeArchive::new(
        Layout::app("App.app").extension("Widget.appex"),
    ));
    let signer = Arc::new(FakeSigner::default());

    let err = harness
        .pipeline(Arc::clone(&archive), Arc::clone(&signer))
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::EntitlementsExtractionFailure(_)));
    assert!(err.to_string().contains("Entitlements"));
    assert!(signer.order().is_empty());
    assert!(archive.packed.lock().unwrap().is_empty());
    assert!(!harness.inputs.path().join("App-signed.ipa").exists());
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_invalid_request_spawns_nothing() {
    let harness = Harness::new();
    let archive = Arc::new(FakeArchive::new(Layout::app("App.app")));
    let request = SigningRequest::new(
        &harness.archive,
        harness.inputs.path().join("Missing.mobileprovision"),
        IDENTITY,
    );

    let err = harness
        .pipeline(Arc::clone(&archive), Arc::new(FakeSigner::default()))
        .run(&request, &ProgressSink::discard())
        .await
        .unwrap_err();

    assert!(matches!(err, ResignError::Precondition(_)));
    assert_eq!(archive.extracted.load(Ordering::SeqCst), 0);
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_single_framework_run_reports_nine_stages() {
    let harness = Harness::new();
    let layout = Layout::app("App.app").framework("Lib.framework");
    let archive = Arc::new(FakeArchive::new(layout));
    let signer = Arc::new(FakeSigner::default());
    let pipeline = Arc::new(harness.pipeline(Arc::clone(&archive), Arc::clone(&signer)));

    let mut run = pipeline.start(harness.request()).unwrap();
    let mut events = Vec::new();
    while let Some(event) = run.events.recv().await {
        events.push(event);
    }
    let output = run.handle.await.unwrap().unwrap();

    assert_eq!(output, harness.inputs.path().join("App-signed.ipa"));
    assert!(output.is_file());

    let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    let last = events.last().unwrap().to_string();
    assert!(last.starts_with("[9/9]"));
    assert!(last.ends_with(&output.display().to_string()));

    assert_eq!(signer.order(), vec!["Lib.framework", "App.app"]);
    let packed = archive.packed.lock().unwrap();
    assert!(packed.contains_key("Payload/App.app/Frameworks/Lib.framework/binary"));
    assert_eq!(
        packed["Payload/App.app/_CodeSignature/CodeResources"],
        b"signed".to_vec()
    );
}

#[tokio::test]
async fn test_second_run_rejected_while_first_in_flight() {
    let harness = Harness::new();
    let hold = Arc::new(Notify::new());
    let archive = Arc::new(FakeArchive {
        hold: Some(Arc::clone(&hold)),
        ..FakeArchive::new(Layout::app("App.app"))
    });
    let pipeline = Arc::new(harness.pipeline(archive, Arc::new(FakeSigner::default())));

    let first = pipeline.start(harness.request()).unwrap();
    assert!(pipeline.is_running());

    let err = pipeline.start(harness.request()).unwrap_err();
    assert!(matches!(err, ResignError::Precondition(_)));
    let err = pipeline
        .run(&harness.request(), &ProgressSink::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, ResignError::Precondition(_)));

    hold.notify_one();
    first.handle.await.unwrap().unwrap();
    assert!(!pipeline.is_running());
    assert_eq!(harness.leftover_workspaces(), 0);
}
