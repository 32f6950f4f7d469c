//! ipasign Core Library
//!
//! Re-signs iOS app archives with a new signing identity and provisioning
//! profile, and installs the result on attached devices. Format work is
//! delegated to the host's command-line tools.

pub mod device;
pub mod entitlements;
pub mod error;
pub mod identity;
pub mod installer;
pub mod pipeline;
pub mod profile;
pub mod tools;

pub use error::{ResignError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
