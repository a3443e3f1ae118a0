//! `status`: boot mode and staged package

use anyhow::{Context, Result};
use updater_core::prelude::*;

use crate::output::{self, StatusReport};

pub fn execute(config: &UpdaterConfig, json: bool) -> Result<()> {
    let register = FileBootModeRegister::new(&config.boot_mode_path);
    let boot_mode = register.get().context("reading boot mode")?;
    let changed_at = register.changed_at().context("reading boot mode")?;

    let mut report = StatusReport {
        boot_mode,
        changed_at,
        package: None,
        manifest: None,
        problem: None,
    };

    // A missing or broken package is reported, not fatal.
    match PointerFileLocator::new(&config.package_pointer_path).resolve_current_package_path() {
        Ok(package) => {
            match TextManifestReader::new(&config.manifest_filename).parse(&package) {
                Ok(manifest) => report.manifest = Some(manifest),
                Err(e) => report.problem = Some(e.to_string()),
            }
            report.package = Some(package);
        }
        Err(e) if boot_mode.is_update_phase() => report.problem = Some(e.to_string()),
        Err(_) => {}
    }

    output::print_status(&report, json);
    Ok(())
}
