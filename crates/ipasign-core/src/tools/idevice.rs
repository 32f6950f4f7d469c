//! Device listing, USB inventory, app installation and package installs.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ResignError, Result};
use crate::tools::process::{run_captured, run_checked, shell_quote};
use crate::tools::{Tool, ToolLocator};

/// Dedicated device-listing tooling.
#[async_trait]
pub trait DeviceLister: Send + Sync {
    /// Identifiers of attached devices, or `None` when the tool is
    /// unavailable or exits unsuccessfully.
    async fn list_device_ids(&self) -> Option<Vec<String>>;

    /// Best-effort display name for a device.
    async fn device_name(&self, id: &str) -> Option<String>;
}

/// Platform USB device inventory.
#[async_trait]
pub trait UsbInventory: Send + Sync {
    /// Raw JSON inventory, or `None` if it could not be queried.
    async fn usb_tree(&self) -> Option<Vec<u8>>;
}

/// Pushes an app archive onto a device.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, artifact: &Path, device_id: &str) -> Result<()>;
}

/// Installs packages through a package manager.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install_package(&self, package: &str) -> Result<()>;
}

/// Lists devices with libimobiledevice's `idevice_id` and `idevicename`.
pub struct IdeviceLister {
    locator: Arc<ToolLocator>,
}

impl IdeviceLister {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl DeviceLister for IdeviceLister {
    async fn list_device_ids(&self) -> Option<Vec<String>> {
        let idevice_id = self.locator.locate(Tool::IdeviceId)?;
        let output = match run_captured(Tool::IdeviceId, &idevice_id, ["-l"]).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("idevice_id could not run: {}", e);
                return None;
            }
        };

        if !output.success() {
            tracing::debug!("idevice_id exited with {}", output.exit_code);
            return None;
        }

        Some(
            output
                .stdout_text()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    async fn device_name(&self, id: &str) -> Option<String> {
        let idevicename = self.locator.locate(Tool::IdeviceName)?;
        let output = run_captured(Tool::IdeviceName, &idevicename, ["-u", id])
            .await
            .ok()?;
        if !output.success() {
            return None;
        }
        let name = output.stdout_text().trim().to_string();
        (!name.is_empty()).then_some(name)
    }
}

/// Reads the USB inventory with `system_profiler SPUSBDataType -json`.
pub struct SystemProfilerInventory {
    locator: Arc<ToolLocator>,
}

impl SystemProfilerInventory {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl UsbInventory for SystemProfilerInventory {
    async fn usb_tree(&self) -> Option<Vec<u8>> {
        let profiler = self.locator.locate(Tool::SystemProfiler)?;
        match run_captured(Tool::SystemProfiler, &profiler, ["SPUSBDataType", "-json"]).await {
            Ok(output) => Some(output.stdout),
            Err(e) => {
                tracing::debug!("system_profiler could not run: {}", e);
                None
            }
        }
    }
}

/// Runs `ideviceinstaller` through a login shell so Homebrew's bin
/// directories are on `PATH`.
pub struct LoginShellInstaller {
    locator: Arc<ToolLocator>,
}

impl LoginShellInstaller {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    /// Builds the shell command line, preferring an already located binary.
    fn command_line(&self, artifact: &Path, device_id: &str) -> String {
        let program = self
            .locator
            .locate(Tool::IdeviceInstaller)
            .map(|p| shell_quote(&p.to_string_lossy()))
            .unwrap_or_else(|| Tool::IdeviceInstaller.as_str().to_string());
        format!(
            "{} -u {} -i {}",
            program,
            shell_quote(device_id),
            shell_quote(&artifact.to_string_lossy())
        )
    }
}

#[async_trait]
impl Installer for LoginShellInstaller {
    async fn install(&self, artifact: &Path, device_id: &str) -> Result<()> {
        let shell = self.locator.require(Tool::LoginShell)?;
        let command = self.command_line(artifact, device_id);

        let output = run_captured(
            Tool::LoginShell,
            &shell,
            [OsStr::new("-l"), OsStr::new("-c"), OsStr::new(&command)],
        )
        .await?;

        if !output.success() {
            return Err(ResignError::InstallFailure {
                output: output.combined(),
            });
        }
        Ok(())
    }
}

/// Homebrew package manager.
pub struct Homebrew {
    locator: Arc<ToolLocator>,
}

impl Homebrew {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl PackageManager for Homebrew {
    async fn install_package(&self, package: &str) -> Result<()> {
        let brew = self.locator.require(Tool::Brew)?;
        run_checked(Tool::Brew, &brew, ["install", package]).await?;
        Ok(())
    }
}
