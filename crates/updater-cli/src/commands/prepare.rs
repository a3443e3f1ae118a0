//! `prepare`: stage a package and request the pre-update boot

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;
use updater_core::prelude::*;

use crate::error::CliError;
use crate::output::{self, PreparedPackage};

pub fn execute(config: &UpdaterConfig, package_dir: &Path, json: bool) -> Result<()> {
    let register = FileBootModeRegister::new(&config.boot_mode_path);
    let current = register.get().context("reading boot mode")?;
    if current != BootMode::Normal {
        return Err(CliError::InvalidRequest(format!(
            "boot mode is {current}, an update is already in progress"
        ))
        .into());
    }

    if !package_dir.is_dir() {
        return Err(CliError::InvalidPackage(format!(
            "{} is not a directory",
            package_dir.display()
        ))
        .into());
    }
    let package = package_dir
        .canonicalize()
        .with_context(|| format!("resolving {}", package_dir.display()))?;

    let manifest = TextManifestReader::new(&config.manifest_filename)
        .parse(&package)
        .map_err(|e| CliError::InvalidPackage(e.to_string()))?;

    let mut required = vec![manifest.loader.as_str()];
    required.extend(manifest.radio.as_deref());
    required.extend(manifest.resource_bundle());
    for name in required {
        if !package.join(name).is_file() {
            return Err(CliError::InvalidPackage(format!(
                "manifest names '{name}' but it is missing from {}",
                package.display()
            ))
            .into());
        }
    }

    manifest
        .verify_loader(&package)
        .map_err(|e| CliError::InvalidPackage(e.to_string()))?;

    match PointerFileLocator::new(&config.package_pointer_path).write_pointer(&package) {
        Ok(()) => {}
        Err(e @ UpdateError::PackageUnavailable(_)) => {
            return Err(CliError::InvalidPackage(e.to_string()).into());
        }
        Err(e) => return Err(anyhow::Error::new(e).context("recording package pointer")),
    }
    register
        .set(BootMode::PreUpdate)
        .context("requesting pre-update boot")?;

    info!(package = %package.display(), info = %manifest.info, "Package staged");
    output::print_prepared(
        &PreparedPackage {
            package,
            manifest,
            boot_mode: BootMode::PreUpdate,
        },
        json,
    );
    Ok(())
}
