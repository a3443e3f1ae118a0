//! Command implementations for updaterctl

pub mod mode;
pub mod prepare;
pub mod run;
pub mod status;

use anyhow::Result;
use std::path::Path;
use tracing::debug;
use updater_core::UpdaterConfig;

use crate::error::CliError;

/// Load the configuration from `path`, or the platform default location.
pub fn load_config(path: Option<&Path>) -> Result<UpdaterConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => UpdaterConfig::default_config_path()
            .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?,
    };

    debug!(path = %path.display(), "Loading configuration");
    let config = UpdaterConfig::load_from_path(&path)
        .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?;
    Ok(config)
}
