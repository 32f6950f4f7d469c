//! Installing signed archives onto devices.

use std::path::Path;
use std::sync::Arc;

use crate::error::{ResignError, Result};
use crate::tools::{
    Homebrew, Installer, LoginShellInstaller, PackageManager, Tool, ToolLocator,
};

/// Package providing the installer tool.
pub const INSTALLER_PACKAGE: &str = "ideviceinstaller";

pub struct DeviceInstaller {
    installer: Arc<dyn Installer>,
    package_manager: Arc<dyn PackageManager>,
    locator: Arc<ToolLocator>,
}

impl DeviceInstaller {
    pub fn new(
        installer: Arc<dyn Installer>,
        package_manager: Arc<dyn PackageManager>,
        locator: Arc<ToolLocator>,
    ) -> Self {
        Self {
            installer,
            package_manager,
            locator,
        }
    }

    pub fn system(locator: Arc<ToolLocator>) -> Self {
        Self::new(
            Arc::new(LoginShellInstaller::new(Arc::clone(&locator))),
            Arc::new(Homebrew::new(Arc::clone(&locator))),
            locator,
        )
    }

    /// Installs `artifact` on the device `device_id`.
    ///
    /// Missing inputs are rejected before any process is started.
    pub async fn install(&self, artifact: Option<&Path>, device_id: &str) -> Result<()> {
        let artifact = Self::check_artifact(artifact)?;

        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(ResignError::Precondition("No device selected".to_string()));
        }

        tracing::info!("Installing {} on {}", artifact.display(), device_id);
        self.installer.install(artifact, device_id).await
    }

    /// Rejects a missing or nonexistent artifact. Callers that discover
    /// devices first run this before discovery.
    pub fn check_artifact(artifact: Option<&Path>) -> Result<&Path> {
        match artifact {
            Some(path) if path.is_file() => Ok(path),
            Some(path) => Err(ResignError::Precondition(format!(
                "Signed archive not found: {}",
                path.display()
            ))),
            None => Err(ResignError::Precondition(
                "Sign an archive before installing".to_string(),
            )),
        }
    }

    /// Whether the installer tool is present in a known location.
    pub fn has_install_tool(&self) -> bool {
        self.locator.locate(Tool::IdeviceInstaller).is_some()
    }

    /// Installs the installer tool through the package manager.
    pub async fn install_tool(&self) -> Result<()> {
        self.package_manager.install_package(INSTALLER_PACKAGE).await?;
        self.locator.forget(Tool::IdeviceInstaller);
        tracing::info!("Installed {}", INSTALLER_PACKAGE);
        Ok(())
    }
}
