//! External tool capabilities.
//!
//! Each delegated tool sits behind a narrow async trait so the pipeline and
//! registries can run against fakes in tests. The system implementations
//! resolve their executables through [`ToolLocator`].

pub mod archive;
pub mod codesign;
pub mod idevice;
pub mod locator;
pub mod plist_tools;
pub mod process;

pub use archive::{ArchiveTool, SystemArchiveTool};
pub use codesign::{Codesign, SignerTool};
pub use idevice::{
    DeviceLister, Homebrew, IdeviceLister, Installer, LoginShellInstaller, PackageManager,
    SystemProfilerInventory, UsbInventory,
};
pub use locator::{Tool, ToolLocator};
pub use plist_tools::{
    NativePlistQuery, PlistQuery, ProfileDecoder, SystemPlistQuery, SystemProfileDecoder,
};
pub use process::CommandOutput;
