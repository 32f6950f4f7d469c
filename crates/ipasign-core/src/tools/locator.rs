//! Resolution of optional external tools to absolute paths.
//!
//! Tools are looked up in a fixed, tool-specific list of candidate locations
//! rather than on `PATH`, since they usually come from Xcode or Homebrew and
//! GUI-launched processes often run with a minimal search path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::error::{ResignError, Result};

/// Logical name of an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Keychain tool: identity listing, certificate import, profile decoding.
    Security,
    Codesign,
    Unzip,
    Zip,
    PlistBuddy,
    /// Profile decoding fallback when `security` is unavailable.
    Openssl,
    Brew,
    IdeviceId,
    IdeviceName,
    IdeviceInstaller,
    SystemProfiler,
    /// Shell used for login-shell invocations.
    LoginShell,
}

impl Tool {
    /// Every known tool, in display order.
    pub const ALL: [Tool; 12] = [
        Tool::Security,
        Tool::Codesign,
        Tool::Unzip,
        Tool::Zip,
        Tool::PlistBuddy,
        Tool::Openssl,
        Tool::Brew,
        Tool::IdeviceId,
        Tool::IdeviceName,
        Tool::IdeviceInstaller,
        Tool::SystemProfiler,
        Tool::LoginShell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Security => "security",
            Tool::Codesign => "codesign",
            Tool::Unzip => "unzip",
            Tool::Zip => "zip",
            Tool::PlistBuddy => "plistbuddy",
            Tool::Openssl => "openssl",
            Tool::Brew => "brew",
            Tool::IdeviceId => "idevice_id",
            Tool::IdeviceName => "idevicename",
            Tool::IdeviceInstaller => "ideviceinstaller",
            Tool::SystemProfiler => "system_profiler",
            Tool::LoginShell => "login-shell",
        }
    }

    /// Default candidate locations, probed in order.
    pub fn default_candidates(&self) -> Vec<PathBuf> {
        let paths: &[&str] = match self {
            Tool::Security => &["/usr/bin/security"],
            Tool::Codesign => &["/usr/bin/codesign"],
            Tool::Unzip => &["/usr/bin/unzip"],
            Tool::Zip => &["/usr/bin/zip"],
            Tool::PlistBuddy => &["/usr/libexec/PlistBuddy"],
            Tool::Openssl => &[
                "/usr/bin/openssl",
                "/opt/homebrew/bin/openssl",
                "/usr/local/bin/openssl",
            ],
            Tool::Brew => &["/opt/homebrew/bin/brew", "/usr/local/bin/brew"],
            Tool::IdeviceId => &["/opt/homebrew/bin/idevice_id", "/usr/local/bin/idevice_id"],
            Tool::IdeviceName => &[
                "/opt/homebrew/bin/idevicename",
                "/usr/local/bin/idevicename",
            ],
            Tool::IdeviceInstaller => &[
                "/usr/local/bin/ideviceinstaller",
                "/opt/homebrew/bin/ideviceinstaller",
            ],
            Tool::SystemProfiler => &["/usr/sbin/system_profiler"],
            Tool::LoginShell => &["/bin/zsh", "/bin/bash"],
        };
        paths.iter().map(PathBuf::from).collect()
    }

    /// What the user should do when the tool cannot be found.
    pub fn remediation(&self) -> &'static str {
        match self {
            Tool::Security | Tool::Codesign | Tool::PlistBuddy => {
                "Install the Xcode command line tools: xcode-select --install"
            }
            Tool::Unzip | Tool::Zip => "Install zip/unzip with your system package manager",
            Tool::Openssl => "Run: brew install openssl",
            Tool::Brew => {
                "Install Homebrew first: /bin/bash -c \"$(curl -fsSL https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)\""
            }
            Tool::IdeviceId | Tool::IdeviceName => "Run: brew install libimobiledevice",
            Tool::IdeviceInstaller => {
                "Run: brew install ideviceinstaller (or 'ipasign install-tool')"
            }
            Tool::SystemProfiler => "system_profiler is only available on macOS",
            Tool::LoginShell => "Install zsh or bash",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Tool::ALL
            .iter()
            .copied()
            .find(|tool| tool.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Tool::ALL.iter().map(|t| t.as_str()).collect();
                format!("Unknown tool '{}'. Valid tools: {}", s, names.join(", "))
            })
    }
}

/// Locates external tools by probing candidate paths.
///
/// Only hits are cached, so a tool installed while the process runs is
/// picked up on the next lookup.
#[derive(Debug)]
pub struct ToolLocator {
    candidates: HashMap<Tool, Vec<PathBuf>>,
    cache: DashMap<Tool, PathBuf>,
}

impl ToolLocator {
    /// Creates a locator with the default candidate lists.
    pub fn new() -> Self {
        let candidates = Tool::ALL
            .iter()
            .map(|tool| (*tool, tool.default_candidates()))
            .collect();
        Self {
            candidates,
            cache: DashMap::new(),
        }
    }

    /// Creates a locator where no tool has any candidate.
    ///
    /// Useful for tests that register only the fakes they need.
    pub fn empty() -> Self {
        Self {
            candidates: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Replaces the candidate list for a tool.
    pub fn with_candidates(mut self, tool: Tool, paths: Vec<PathBuf>) -> Self {
        self.candidates.insert(tool, paths);
        self.cache.remove(&tool);
        self
    }

    /// Puts a path in front of a tool's candidate list.
    pub fn with_override(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.candidates.entry(tool).or_default().insert(0, path.into());
        self.cache.remove(&tool);
        self
    }

    /// Candidate paths for a tool, in probe order.
    pub fn candidates(&self, tool: Tool) -> &[PathBuf] {
        self.candidates.get(&tool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the first candidate that exists on disk.
    pub fn locate(&self, tool: Tool) -> Option<PathBuf> {
        if let Some(hit) = self.cache.get(&tool) {
            return Some(hit.clone());
        }

        let found = self
            .candidates(tool)
            .iter()
            .find(|path| is_file(path))
            .cloned()?;

        tracing::debug!("Located {} at {}", tool, found.display());
        self.cache.insert(tool, found.clone());
        Some(found)
    }

    /// Like [`locate`](Self::locate), but absence becomes `ToolMissing`.
    pub fn require(&self, tool: Tool) -> Result<PathBuf> {
        self.locate(tool).ok_or_else(|| ResignError::ToolMissing {
            tool: tool.to_string(),
            remediation: tool.remediation().to_string(),
        })
    }

    /// Drops a cached hit so the next lookup probes again.
    pub fn forget(&self, tool: Tool) {
        self.cache.remove(&tool);
    }
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new()
    }
}

fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(tool.as_str().parse::<Tool>().unwrap(), tool);
        }
        assert_eq!("PlistBuddy".parse::<Tool>().unwrap(), Tool::PlistBuddy);
    }

    #[test]
    fn test_unknown_tool_lists_valid_names() {
        let err = "xcrun".parse::<Tool>().unwrap_err();
        assert!(err.contains("xcrun"));
        assert!(err.contains("ideviceinstaller"));
    }

    #[test]
    fn test_locate_returns_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&second, b"").unwrap();

        let locator = ToolLocator::empty()
            .with_candidates(Tool::Brew, vec![first.clone(), second.clone()]);
        assert_eq!(locator.locate(Tool::Brew), Some(second.clone()));

        // Later appearance of an earlier candidate does not change a cached hit
        std::fs::write(&first, b"").unwrap();
        assert_eq!(locator.locate(Tool::Brew), Some(second.clone()));

        locator.forget(Tool::Brew);
        assert_eq!(locator.locate(Tool::Brew), Some(first));
    }

    #[test]
    fn test_absence_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let tool_path = dir.path().join("ideviceinstaller");
        let locator =
            ToolLocator::empty().with_candidates(Tool::IdeviceInstaller, vec![tool_path.clone()]);

        assert!(locator.locate(Tool::IdeviceInstaller).is_none());
        std::fs::write(&tool_path, b"").unwrap();
        assert_eq!(locator.locate(Tool::IdeviceInstaller), Some(tool_path));
    }

    #[test]
    fn test_directories_are_not_tools() {
        let dir = tempfile::tempdir().unwrap();
        let locator =
            ToolLocator::empty().with_candidates(Tool::Zip, vec![dir.path().to_path_buf()]);
        assert!(locator.locate(Tool::Zip).is_none());
    }

    #[test]
    fn test_require_reports_remediation() {
        let locator = ToolLocator::empty();
        match locator.require(Tool::IdeviceInstaller) {
            Err(ResignError::ToolMissing { tool, remediation }) => {
                assert_eq!(tool, "ideviceinstaller");
                assert!(remediation.contains("brew install ideviceinstaller"));
            }
            other => panic!("expected ToolMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_override_is_probed_first() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("codesign");
        std::fs::write(&custom, b"").unwrap();

        let locator = ToolLocator::new().with_override(Tool::Codesign, custom.clone());
        assert_eq!(locator.candidates(Tool::Codesign)[0], custom);
        assert_eq!(locator.locate(Tool::Codesign), Some(custom));
    }
}
