//! Progress reporting for signing runs.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// Pipeline stages that report progress, in execution order.
///
/// Workspace cleanup follows [`Stage::Repackage`] on every exit path but is
/// not reported as progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AcquireWorkspace,
    Extract,
    LocateBundle,
    StripSignatures,
    InjectProfile,
    ExtractEntitlements,
    SignNestedCode,
    SignMainBundle,
    Repackage,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::AcquireWorkspace,
        Stage::Extract,
        Stage::LocateBundle,
        Stage::StripSignatures,
        Stage::InjectProfile,
        Stage::ExtractEntitlements,
        Stage::SignNestedCode,
        Stage::SignMainBundle,
        Stage::Repackage,
    ];

    /// 1-based position of the stage.
    pub fn number(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::AcquireWorkspace => "acquire_workspace",
            Stage::Extract => "extract",
            Stage::LocateBundle => "locate_bundle",
            Stage::StripSignatures => "strip_signatures",
            Stage::InjectProfile => "inject_profile",
            Stage::ExtractEntitlements => "extract_entitlements",
            Stage::SignNestedCode => "sign_nested_code",
            Stage::SignMainBundle => "sign_main_bundle",
            Stage::Repackage => "repackage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One human-readable line describing a completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.stage.number(),
            Stage::ALL.len(),
            self.message
        )
    }
}

/// Sending half of a progress stream.
///
/// Reporting is observational: a dropped receiver never affects the run.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that only logs.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Creates a sink with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        let event = ProgressEvent {
            stage,
            message: message.into(),
        };
        tracing::info!(stage = %stage, "{}", event.message);

        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
