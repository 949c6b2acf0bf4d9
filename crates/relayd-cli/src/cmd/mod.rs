pub mod config;
pub mod serve;

use anyhow::Result;
use relayd_core::config::RelayConfig;
use std::path::Path;

/// Load the configuration file if one was given, otherwise fall back to
/// the built-in four-relay defaults.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => RelayConfig::load(path),
        None => Ok(RelayConfig::default()),
    }
}
