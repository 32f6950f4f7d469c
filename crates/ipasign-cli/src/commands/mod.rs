//! CLI command implementations.

pub mod config;
pub mod devices;
pub mod identities;
pub mod install;
pub mod profile;
pub mod sign;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use ipasign_core::tools::ToolLocator;

use crate::config::ResolvedConfig;
use crate::state::SessionState;

/// Shared state for commands that touch external tools.
pub struct AppContext {
    pub config: ResolvedConfig,
    pub locator: Arc<ToolLocator>,
    pub state: SessionState,
    pub state_path: PathBuf,
}

impl AppContext {
    pub fn new(config: ResolvedConfig, state_path: PathBuf) -> Self {
        let locator = Arc::new(config.locator());
        let state = SessionState::load_from(&state_path);
        Self {
            config,
            locator,
            state,
            state_path,
        }
    }

    /// Persists session state; failures are reported but not fatal.
    pub fn save_state(&self) {
        if let Err(e) = self.state.save_to(&self.state_path) {
            crate::output::print_warning(&format!("Could not save session state: {:#}", e));
        }
    }
}
