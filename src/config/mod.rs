//! Operations Configuration Module
//!
//! Per-site configuration loaded from TOML, covering every threshold the
//! estimator, segmenter, reconciler, scheduler and simulator use.
//!
//! ## Loading Order
//!
//! 1. `CAULDRON_CONFIG` environment variable (path to TOML file)
//! 2. `cauldron_ops.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(OpsConfig::load());
//!
//! // Anywhere in the codebase:
//! let cap = config::get().segmentation.max_episode_volume;
//! ```

mod ops_config;
pub mod defaults;
pub mod validation;

pub use ops_config::*;

use std::sync::OnceLock;

/// Global configuration, initialized once at startup.
static OPS_CONFIG: OnceLock<OpsConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: OpsConfig) {
    if OPS_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global configuration, or the built-in defaults when `init()`
/// has not been called (library use and tests).
pub fn get() -> &'static OpsConfig {
    OPS_CONFIG.get_or_init(OpsConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    OPS_CONFIG.get().is_some()
}
