//! In-memory fakes of the orchestrator ports.
//!
//! Every fake records into a shared [`CallLog`] so tests can assert the order
//! of boot mode writes relative to the risky operations around them.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use updater_core::error::{Result, UpdateError};
use updater_core::prelude::*;

/// One observed collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetBootMode,
    SetBootMode(BootMode),
    ResolvePackage,
    ParseManifest(PathBuf),
    Backup(PathBuf),
    Restore(PathBuf),
    OpenBundle(PathBuf),
    CountEntries,
    Extract(PathBuf),
}

impl Call {
    /// Calls that touch the settings store or external storage
    pub fn is_work(&self) -> bool {
        matches!(
            self,
            Call::Backup(_) | Call::Restore(_) | Call::OpenBundle(_) | Call::Extract(_)
        )
    }
}

/// Ordered record of calls shared by all fakes of one harness
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.0.lock().iter().position(|c| c == call)
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.position(call).is_some()
    }

    pub fn boot_mode_writes(&self) -> Vec<BootMode> {
        self.0
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::SetBootMode(mode) => Some(*mode),
                _ => None,
            })
            .collect()
    }

    pub fn any_work(&self) -> bool {
        self.0.lock().iter().any(Call::is_work)
    }

    pub fn count_where(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }
}

#[derive(Debug, Clone)]
pub struct FakeRegister {
    log: CallLog,
    mode: Arc<Mutex<BootMode>>,
    pub fail_get: bool,
    pub fail_set_to: Option<BootMode>,
}

impl FakeRegister {
    pub fn new(log: CallLog, mode: BootMode) -> Self {
        Self {
            log,
            mode: Arc::new(Mutex::new(mode)),
            fail_get: false,
            fail_set_to: None,
        }
    }

    pub fn mode(&self) -> BootMode {
        *self.mode.lock()
    }

    /// Simulate the bootloader or a power cycle changing the flag.
    pub fn force(&self, mode: BootMode) {
        *self.mode.lock() = mode;
    }
}

impl BootModeRegister for FakeRegister {
    fn get(&self) -> Result<BootMode> {
        self.log.push(Call::GetBootMode);
        if self.fail_get {
            return Err(UpdateError::BootMode("register unreadable".to_string()));
        }
        Ok(self.mode())
    }

    fn set(&self, mode: BootMode) -> Result<()> {
        if self.fail_set_to == Some(mode) {
            return Err(UpdateError::BootMode(format!("cannot write {mode}")));
        }
        self.log.push(Call::SetBootMode(mode));
        *self.mode.lock() = mode;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FakeLocator {
    log: CallLog,
    pub package: Option<PathBuf>,
}

impl FakeLocator {
    pub fn new(log: CallLog, package: impl Into<PathBuf>) -> Self {
        Self {
            log,
            package: Some(package.into()),
        }
    }
}

impl PackageLocator for FakeLocator {
    fn resolve_current_package_path(&self) -> Result<PathBuf> {
        self.log.push(Call::ResolvePackage);
        self.package
            .clone()
            .ok_or_else(|| UpdateError::PackageUnavailable("no package pointer".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct FakeStore {
    log: CallLog,
    pub fail_backup: bool,
    pub fail_restore: bool,
}

impl FakeStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_backup: false,
            fail_restore: false,
        }
    }
}

impl StoreBackup for FakeStore {
    fn backup(&self, destination: &Path) -> Result<()> {
        self.log.push(Call::Backup(destination.to_path_buf()));
        if self.fail_backup {
            return Err(UpdateError::Backup {
                path: destination.to_path_buf(),
                reason: "no space left on device".to_string(),
            });
        }
        Ok(())
    }

    fn restore(&self, source: &Path) -> Result<()> {
        self.log.push(Call::Restore(source.to_path_buf()));
        if self.fail_restore {
            return Err(UpdateError::Restore {
                path: source.to_path_buf(),
                reason: "archive truncated".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FakeManifests {
    log: CallLog,
    pub bundle: Option<String>,
    pub fail: bool,
}

impl FakeManifests {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            bundle: None,
            fail: false,
        }
    }
}

impl ManifestReader for FakeManifests {
    fn parse(&self, package_path: &Path) -> Result<Manifest> {
        self.log.push(Call::ParseManifest(package_path.to_path_buf()));
        if self.fail {
            return Err(UpdateError::Manifest("missing required key 'Loader'".to_string()));
        }
        Ok(Manifest {
            format_version: 2,
            info: "f7-update-test".to_string(),
            target: 7,
            loader: "firmware.dfu".to_string(),
            loader_crc: None,
            radio: None,
            resource_bundle_filename: self.bundle.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeUnpacker {
    log: CallLog,
    pub entries: usize,
    pub fail_open: bool,
    /// Fail extraction after this many entries were reported
    pub fail_after: Option<usize>,
}

impl FakeUnpacker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            entries: 0,
            fail_open: false,
            fail_after: None,
        }
    }
}

impl ResourceUnpacker for FakeUnpacker {
    fn open(&self, path: &Path) -> Result<Box<dyn ResourceArchive>> {
        self.log.push(Call::OpenBundle(path.to_path_buf()));
        if self.fail_open {
            return Err(UpdateError::ResourceOpen {
                path: path.to_path_buf(),
                reason: "not found".to_string(),
            });
        }
        Ok(Box::new(FakeArchive {
            log: self.log.clone(),
            entries: self.entries,
            fail_after: self.fail_after,
        }))
    }
}

struct FakeArchive {
    log: CallLog,
    entries: usize,
    fail_after: Option<usize>,
}

impl ResourceArchive for FakeArchive {
    fn entry_count(&mut self) -> Result<usize> {
        self.log.push(Call::CountEntries);
        Ok(self.entries)
    }

    fn extract_all(
        &mut self,
        destination: &Path,
        observer: &mut dyn UnpackObserver,
    ) -> Result<()> {
        self.log.push(Call::Extract(destination.to_path_buf()));
        for i in 0..self.entries {
            if self.fail_after == Some(i) {
                return Err(UpdateError::ResourceExtract(format!("entry {i}: write failed")));
            }
            let is_directory = i % 4 == 0;
            observer.on_entry(&format!("res/{i}"), is_directory);
        }
        Ok(())
    }
}

/// Sink keeping every snapshot it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<UpdateProgress>>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<UpdateProgress> {
        self.0.lock().clone()
    }

    pub fn last(&self) -> Option<UpdateProgress> {
        self.0.lock().last().cloned()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.0.lock().iter().map(|p| p.percent).collect()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.0.lock().iter().map(|p| p.stage).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn set_progress(&self, progress: &UpdateProgress) {
        self.0.lock().push(progress.clone());
    }
}

/// All fakes wired to one call log
///
/// Configure the public fakes, then call [`Harness::orchestrator`]; the
/// orchestrator receives clones sharing the same state.
#[derive(Debug, Clone)]
pub struct Harness {
    pub log: CallLog,
    pub register: FakeRegister,
    pub locator: FakeLocator,
    pub store: FakeStore,
    pub manifests: FakeManifests,
    pub unpacker: FakeUnpacker,
    pub sink: RecordingSink,
    pub layout: UpdateLayout,
}

impl Harness {
    pub const PACKAGE: &'static str = "/ext/update/f7-update-0.43.1";

    pub fn new(mode: BootMode) -> Self {
        let log = CallLog::default();
        Self {
            register: FakeRegister::new(log.clone(), mode),
            locator: FakeLocator::new(log.clone(), Self::PACKAGE),
            store: FakeStore::new(log.clone()),
            manifests: FakeManifests::new(log.clone()),
            unpacker: FakeUnpacker::new(log.clone()),
            sink: RecordingSink::default(),
            layout: UpdateLayout::default(),
            log,
        }
    }

    pub fn with_bundle(mut self, name: &str, entries: usize) -> Self {
        self.manifests.bundle = Some(name.to_string());
        self.unpacker.entries = entries;
        self
    }

    pub fn orchestrator(&self) -> UpdateOrchestrator {
        let ports = UpdatePorts {
            register: Box::new(self.register.clone()),
            locator: Box::new(self.locator.clone()),
            store: Box::new(self.store.clone()),
            manifests: Box::new(self.manifests.clone()),
            unpacker: Box::new(self.unpacker.clone()),
            progress: Box::new(self.sink.clone()),
        };
        UpdateOrchestrator::new(ports, self.layout.clone())
    }

    pub fn boot_mode(&self) -> BootMode {
        self.register.mode()
    }

    pub fn backup_path(&self) -> PathBuf {
        Path::new(Self::PACKAGE).join(&self.layout.backup_filename)
    }
}
