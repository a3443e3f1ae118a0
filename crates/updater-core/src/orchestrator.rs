//! Two-phase update orchestrator
//!
//! Runs once per boot while the boot mode selects an update phase:
//!
//! - `PreUpdate`: back up the settings store into the package, then hand off
//!   to the bootloader by setting `Update`.
//! - `PostUpdate`: restore the settings store and unpack the optional resource
//!   bundle, then resume normal operation.
//!
//! Every phase first commits `Normal` to the register before touching any
//! data, so a crash or failure part way through always yields a normal boot
//! on the next power-up instead of an update loop. The register only advances
//! to `Update` once the backup has been written.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::boot_mode::{BootMode, BootModeRegister};
use crate::error::Result;
use crate::manifest::ManifestReader;
use crate::package::PackageLocator;
use crate::progress::{ProgressSink, Stage, UpdateTaskState, extraction_percent};
use crate::resources::{DEFAULT_RESOURCES_ROOT, ResourceUnpacker, UnpackObserver};
use crate::store::{DEFAULT_BACKUP_FILENAME, StoreBackup};

/// Fixed locations used by both phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLayout {
    /// Backup archive name inside the package directory
    pub backup_filename: String,

    /// Root that resource bundles are extracted to
    pub resources_root: PathBuf,
}

impl Default for UpdateLayout {
    fn default() -> Self {
        Self {
            backup_filename: DEFAULT_BACKUP_FILENAME.to_string(),
            resources_root: PathBuf::from(DEFAULT_RESOURCES_ROOT),
        }
    }
}

/// Collaborators the orchestrator drives
pub struct UpdatePorts {
    /// Durable boot mode flag
    pub register: Box<dyn BootModeRegister>,
    /// Resolves the package being applied
    pub locator: Box<dyn PackageLocator>,
    /// Settings store backup/restore
    pub store: Box<dyn StoreBackup>,
    /// Package manifest parser
    pub manifests: Box<dyn ManifestReader>,
    /// Resource bundle extraction
    pub unpacker: Box<dyn ResourceUnpacker>,
    /// Progress observer
    pub progress: Box<dyn ProgressSink>,
}

/// Bundle extraction totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Bundle filename from the manifest
    pub bundle: String,
    /// Entries counted when the bundle was opened
    pub total_entries: usize,
    /// Entries reported by the extractor
    pub processed_entries: usize,
}

/// Successful result of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOutcome {
    /// Not an update boot; the register was reset to `Normal`
    NoOp {
        /// Boot mode found on entry
        found: BootMode,
    },

    /// Settings backed up, register set to `Update`
    BackupCompleted {
        /// Backup archive written
        backup_path: PathBuf,
    },

    /// Settings restored, register left at `Normal`
    RestoreCompleted {
        /// Bundle extraction totals, if the package ships a bundle
        resources: Option<ResourceSummary>,
    },
}

impl UpdateOutcome {
    /// Boot mode the register holds after this outcome
    pub fn boot_mode(&self) -> BootMode {
        match self {
            UpdateOutcome::BackupCompleted { .. } => BootMode::Update,
            UpdateOutcome::NoOp { .. } | UpdateOutcome::RestoreCompleted { .. } => {
                BootMode::Normal
            }
        }
    }
}

/// Drives the backup/restore state machine
pub struct UpdateOrchestrator {
    ports: UpdatePorts,
    layout: UpdateLayout,
    state: UpdateTaskState,
}

impl UpdateOrchestrator {
    /// Create an orchestrator over `ports`
    pub fn new(ports: UpdatePorts, layout: UpdateLayout) -> Self {
        Self {
            ports,
            layout,
            state: UpdateTaskState::default(),
        }
    }

    /// Progress state of the last invocation
    pub fn state(&self) -> &UpdateTaskState {
        &self.state
    }

    /// Paths in use
    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    /// Run the phase selected by the boot mode.
    ///
    /// On return the register holds `Normal` or `Update`, never one of the
    /// in-progress values, unless the register itself could not be read.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the phase. The progress sink has
    /// already seen `Stage::Error` with the last reported percent.
    pub fn run(&mut self) -> Result<UpdateOutcome> {
        let boot_mode = self.ports.register.get()?;

        if !boot_mode.is_update_phase() {
            warn!(boot_mode = %boot_mode, "Update worker started outside an update boot, resetting to normal");
            self.ports.register.set(BootMode::Normal)?;
            return Ok(UpdateOutcome::NoOp { found: boot_mode });
        }

        self.state = UpdateTaskState::default();

        // No package means no update context: fail without touching the register.
        let result = match self.ports.locator.resolve_current_package_path() {
            Ok(package_path) => {
                info!(boot_mode = %boot_mode, package = %package_path.display(), "Starting update phase");
                match boot_mode {
                    BootMode::PreUpdate => self.pre_update(&package_path),
                    _ => self.post_update(&package_path),
                }
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(outcome) => {
                self.set_progress(Stage::Completed, 100);
                info!(?outcome, "Update phase completed");
            }
            Err(e) => {
                let percent = self.state.progress_percent;
                self.set_progress(Stage::Error, percent);
                error!(error = %e, class = ?e.class(), "Update phase failed");
            }
        }

        result
    }

    fn pre_update(&mut self, package_path: &Path) -> Result<UpdateOutcome> {
        let backup_path = package_path.join(&self.layout.backup_filename);

        self.state.total_stages = 1;
        self.set_progress(Stage::LfsBackup, 0);

        // A failed or interrupted backup must come back as a normal boot.
        self.ports.register.set(BootMode::Normal)?;

        self.ports.store.backup(&backup_path)?;

        self.ports.register.set(BootMode::Update)?;
        info!(backup = %backup_path.display(), "Settings backed up, ready to flash");

        Ok(UpdateOutcome::BackupCompleted { backup_path })
    }

    fn post_update(&mut self, package_path: &Path) -> Result<UpdateOutcome> {
        self.state.total_stages = 0;

        let manifest = self.ports.manifests.parse(package_path)?;
        let bundle = manifest.resource_bundle().map(str::to_string);
        if bundle.is_some() {
            self.state.total_stages = self.state.total_stages.saturating_add(1);
        }

        self.set_progress(Stage::LfsRestore, 0);

        // A crash during restore resumes as a normal boot, not another restore.
        self.ports.register.set(BootMode::Normal)?;

        let backup_path = package_path.join(&self.layout.backup_filename);
        self.ports.store.restore(&backup_path)?;

        let resources = match bundle {
            Some(bundle) => Some(self.unpack_resources(package_path, bundle)?),
            None => None,
        };

        Ok(UpdateOutcome::RestoreCompleted { resources })
    }

    fn unpack_resources(&mut self, package_path: &Path, bundle: String) -> Result<ResourceSummary> {
        self.set_progress(Stage::ResourcesUpdate, 0);

        let bundle_path = package_path.join(&bundle);
        let mut archive = self.ports.unpacker.open(&bundle_path)?;
        let total_entries = archive.entry_count()?;

        let mut summary = ResourceSummary {
            bundle,
            total_entries,
            processed_entries: 0,
        };

        if total_entries == 0 {
            debug!(bundle = %bundle_path.display(), "Resource bundle is empty");
            return Ok(summary);
        }

        info!(
            bundle = %bundle_path.display(),
            entries = total_entries,
            destination = %self.layout.resources_root.display(),
            "Unpacking resources"
        );

        let mut observer = UnpackProgress {
            state: &mut self.state,
            sink: self.ports.progress.as_ref(),
            total_files: total_entries,
            processed_files: 0,
        };
        archive.extract_all(&self.layout.resources_root, &mut observer)?;
        summary.processed_entries = observer.processed_files;

        Ok(summary)
    }

    fn set_progress(&mut self, stage: Stage, percent: u8) {
        let snapshot = self.state.apply(stage, percent);
        self.ports.progress.set_progress(&snapshot);
    }
}

/// Per-entry extraction callback; runs in-line on the worker.
struct UnpackProgress<'a> {
    state: &'a mut UpdateTaskState,
    sink: &'a dyn ProgressSink,
    total_files: usize,
    processed_files: usize,
}

impl UnpackObserver for UnpackProgress<'_> {
    fn on_entry(&mut self, name: &str, is_directory: bool) -> bool {
        self.processed_files = self.processed_files.saturating_add(1);
        debug!(entry = name, is_directory, processed = self.processed_files, "Unpacking");

        let percent = extraction_percent(self.processed_files, self.total_files);
        let snapshot = self.state.apply(Stage::Progress, percent);
        self.sink.set_progress(&snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_mode::MemoryBootModeRegister;
    use crate::error::UpdateError;
    use crate::manifest::Manifest;
    use crate::progress::UpdateProgress;
    use crate::resources::ResourceArchive;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FixedLocator;

    impl PackageLocator for FixedLocator {
        fn resolve_current_package_path(&self) -> Result<PathBuf> {
            Ok(PathBuf::from("/ext/update/f7-update"))
        }
    }

    #[derive(Default)]
    struct OkStore;

    impl StoreBackup for OkStore {
        fn backup(&self, _destination: &Path) -> Result<()> {
            Ok(())
        }

        fn restore(&self, _source: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct FixedManifest(Option<String>);

    impl ManifestReader for FixedManifest {
        fn parse(&self, _package_path: &Path) -> Result<Manifest> {
            Ok(Manifest {
                format_version: 2,
                info: "test".to_string(),
                target: 7,
                loader: "firmware.dfu".to_string(),
                loader_crc: None,
                radio: None,
                resource_bundle_filename: self.0.clone(),
            })
        }
    }

    struct CountingArchive(usize);

    impl ResourceArchive for CountingArchive {
        fn entry_count(&mut self) -> Result<usize> {
            Ok(self.0)
        }

        fn extract_all(
            &mut self,
            _destination: &Path,
            observer: &mut dyn UnpackObserver,
        ) -> Result<()> {
            for i in 0..self.0 {
                observer.on_entry(&format!("file{i}"), false);
            }
            Ok(())
        }
    }

    struct CountingUnpacker(usize);

    impl ResourceUnpacker for CountingUnpacker {
        fn open(&self, _path: &Path) -> Result<Box<dyn ResourceArchive>> {
            Ok(Box::new(CountingArchive(self.0)))
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<UpdateProgress>>>);

    impl ProgressSink for Recorder {
        fn set_progress(&self, progress: &UpdateProgress) {
            self.0.lock().push(progress.clone());
        }
    }

    fn orchestrator(
        mode: BootMode,
        bundle: Option<&str>,
        entries: usize,
    ) -> (UpdateOrchestrator, MemoryBootModeRegister, Recorder) {
        let register = MemoryBootModeRegister::new(mode);
        let recorder = Recorder::default();
        let ports = UpdatePorts {
            register: Box::new(register.clone()),
            locator: Box::new(FixedLocator),
            store: Box::new(OkStore),
            manifests: Box::new(FixedManifest(bundle.map(str::to_string))),
            unpacker: Box::new(CountingUnpacker(entries)),
            progress: Box::new(recorder.clone()),
        };
        (
            UpdateOrchestrator::new(ports, UpdateLayout::default()),
            register,
            recorder,
        )
    }

    #[test]
    fn test_pre_update_commits_normal_before_update() -> Result<()> {
        let (mut orch, register, _) = orchestrator(BootMode::PreUpdate, None, 0);

        let outcome = orch.run()?;

        assert_eq!(
            outcome,
            UpdateOutcome::BackupCompleted {
                backup_path: PathBuf::from("/ext/update/f7-update/backup.tar"),
            }
        );
        assert_eq!(register.writes(), vec![BootMode::Normal, BootMode::Update]);
        assert_eq!(outcome.boot_mode(), register.mode());
        Ok(())
    }

    #[test]
    fn test_post_update_progress_sequence() -> Result<()> {
        let (mut orch, register, recorder) =
            orchestrator(BootMode::PostUpdate, Some("resources.tar"), 3);

        orch.run()?;

        let seen: Vec<(Stage, u8)> = recorder
            .0
            .lock()
            .iter()
            .map(|p| (p.stage, p.percent))
            .collect();
        assert_eq!(
            seen,
            vec![
                (Stage::LfsRestore, 0),
                (Stage::ResourcesUpdate, 0),
                (Stage::ResourcesUpdate, 25),
                (Stage::ResourcesUpdate, 50),
                (Stage::ResourcesUpdate, 75),
                (Stage::Completed, 100),
            ]
        );
        assert_eq!(orch.state().total_stages, 1);
        assert_eq!(register.mode(), BootMode::Normal);
        Ok(())
    }

    #[test]
    fn test_update_mode_is_noop() -> Result<()> {
        let (mut orch, register, recorder) = orchestrator(BootMode::Update, None, 0);

        let outcome = orch.run()?;

        assert_eq!(
            outcome,
            UpdateOutcome::NoOp {
                found: BootMode::Update
            }
        );
        assert_eq!(register.mode(), BootMode::Normal);
        assert!(recorder.0.lock().is_empty());
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_unexpected_invocation_is_logged() -> Result<()> {
        let (mut orch, _, _) = orchestrator(BootMode::Normal, None, 0);

        orch.run()?;

        assert!(logs_contain("outside an update boot"));
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_failure_is_logged_with_class() {
        let register = MemoryBootModeRegister::new(BootMode::PostUpdate);
        let ports = UpdatePorts {
            register: Box::new(register.clone()),
            locator: Box::new(FixedLocator),
            store: Box::new(OkStore),
            manifests: Box::new(FixedManifest(Some("resources.tar".to_string()))),
            unpacker: Box::new(MissingBundle),
            progress: Box::new(Recorder::default()),
        };
        let mut orch = UpdateOrchestrator::new(ports, UpdateLayout::default());

        let result = orch.run();

        assert!(matches!(result, Err(UpdateError::ResourceOpen { .. })));
        assert_eq!(register.mode(), BootMode::Normal);
        assert!(logs_contain("Update phase failed"));
        assert!(logs_contain("Io"));
    }

    struct MissingBundle;

    impl ResourceUnpacker for MissingBundle {
        fn open(&self, path: &Path) -> Result<Box<dyn ResourceArchive>> {
            Err(UpdateError::ResourceOpen {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            })
        }
    }
}
