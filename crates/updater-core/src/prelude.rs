//! Convenience re-exports for common updater types

pub use crate::boot_mode::{
    BootMode, BootModeRegister, FileBootModeRegister, MemoryBootModeRegister,
};
pub use crate::config::UpdaterConfig;
pub use crate::error::{ErrorClass, UpdateError};
pub use crate::manifest::{
    DEFAULT_MANIFEST_FILENAME, Manifest, ManifestReader, TextManifestReader,
};
pub use crate::orchestrator::{
    ResourceSummary, UpdateLayout, UpdateOrchestrator, UpdateOutcome, UpdatePorts,
};
pub use crate::package::{PackageLocator, PointerFileLocator};
pub use crate::progress::{
    BroadcastProgressSink, FanoutSink, ProgressSink, Stage, TracingProgressSink, UpdateProgress,
    UpdateTaskState,
};
pub use crate::resources::{
    DEFAULT_RESOURCES_ROOT, ResourceArchive, ResourceUnpacker, TarResourceUnpacker,
    UnpackObserver,
};
pub use crate::store::{DEFAULT_BACKUP_FILENAME, StoreBackup, TarStoreBackup};
