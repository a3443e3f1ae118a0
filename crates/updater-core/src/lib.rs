//! Two-phase settings backup/restore around a firmware flash
//!
//! This crate coordinates the work done on either side of a firmware flash:
//! - Backing up the persistent settings store before the flash
//! - Restoring it after the flash, across the reboot boundary
//! - Unpacking the optional resource bundle shipped with the firmware
//! - Reporting stage and percent progress to an observer
//!
//! # Architecture
//!
//! - [`boot_mode`]: Durable boot mode register that selects the phase
//! - [`package`]: Locating the package being applied
//! - [`manifest`]: Package manifest parsing
//! - [`store`]: Settings store backup and restore
//! - [`resources`]: Resource bundle extraction
//! - [`progress`]: Stages, progress state and sinks
//! - [`orchestrator`]: The phase state machine
//! - [`config`]: File locations
//! - [`error`]: Error types
//!
//! # Crash safety
//!
//! The flash itself replaces the running program, so the only protection
//! available is the ordering of boot mode writes. Each phase commits `Normal`
//! before doing any risky work and only advances the register once that work
//! has provably succeeded. A power cut at any point therefore lands on a
//! deterministic phase on the next boot and never loops.
//!
//! # Example
//!
//! ```ignore
//! use updater_core::prelude::*;
//!
//! let config = UpdaterConfig::load_from_path("/etc/updater/config.json")?;
//! let ports = config.ports(Box::new(TracingProgressSink::default()));
//! let mut orchestrator = UpdateOrchestrator::new(ports, config.layout());
//!
//! match orchestrator.run() {
//!     Ok(outcome) => println!("next boot: {}", outcome.boot_mode()),
//!     Err(e) => eprintln!("update phase failed: {e}"),
//! }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic;

pub mod boot_mode;
pub mod config;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod package;
pub mod prelude;
pub mod progress;
pub mod resources;
pub mod store;

pub use boot_mode::{BootMode, BootModeRegister, FileBootModeRegister, MemoryBootModeRegister};
pub use config::{CONFIG_SCHEMA_VERSION, UpdaterConfig};
pub use error::{ErrorClass, UpdateError};
pub use manifest::{Manifest, ManifestReader, TextManifestReader};
pub use orchestrator::{
    ResourceSummary, UpdateLayout, UpdateOrchestrator, UpdateOutcome, UpdatePorts,
};
pub use package::{PackageLocator, PointerFileLocator};
pub use progress::{
    BroadcastProgressSink, FanoutSink, ProgressSink, Stage, TracingProgressSink, UpdateProgress,
    UpdateTaskState, extraction_percent,
};
pub use resources::{ResourceArchive, ResourceUnpacker, TarResourceUnpacker, UnpackObserver};
pub use store::{StoreBackup, TarStoreBackup};
