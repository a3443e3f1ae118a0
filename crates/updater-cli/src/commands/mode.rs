//! `set-mode`: operator override of the boot mode register

use anyhow::{Context, Result};
use tracing::warn;
use updater_core::prelude::*;

use crate::output;

pub fn execute(config: &UpdaterConfig, mode: BootMode, json: bool) -> Result<()> {
    let register = FileBootModeRegister::new(&config.boot_mode_path);
    let previous = register.get().context("reading boot mode")?;

    if mode.is_update_phase() && previous == mode {
        warn!(boot_mode = %mode, "Boot mode already set");
    }

    register.set(mode).context("writing boot mode")?;
    output::print_mode_set(previous, mode, json);
    Ok(())
}
