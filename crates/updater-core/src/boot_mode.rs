//! Persisted boot mode register
//!
//! The boot mode is the single durable flag that selects which update phase
//! runs on the current boot. It lives in storage that survives power loss and
//! firmware replacement, so it is modelled as an injected port rather than
//! global state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::error::{Result, UpdateError};

/// Boot mode stored in always-on state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BootMode {
    /// Regular application boot
    #[default]
    Normal,

    /// Settings must be backed up before the flash
    PreUpdate,

    /// Backup done, the bootloader may flash the image
    Update,

    /// Flash done, settings must be restored
    PostUpdate,
}

impl BootMode {
    /// All values, in protocol order.
    pub const ALL: [BootMode; 4] = [
        BootMode::Normal,
        BootMode::PreUpdate,
        BootMode::Update,
        BootMode::PostUpdate,
    ];

    /// Whether the orchestrator has work to do in this mode
    pub fn is_update_phase(self) -> bool {
        matches!(self, BootMode::PreUpdate | BootMode::PostUpdate)
    }

    /// Stable lowercase name, matching the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            BootMode::Normal => "normal",
            BootMode::PreUpdate => "pre-update",
            BootMode::Update => "update",
            BootMode::PostUpdate => "post-update",
        }
    }
}

impl std::fmt::Display for BootMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BootMode {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "normal" => Ok(BootMode::Normal),
            "pre-update" | "preupdate" => Ok(BootMode::PreUpdate),
            "update" => Ok(BootMode::Update),
            "post-update" | "postupdate" => Ok(BootMode::PostUpdate),
            other => Err(UpdateError::BootMode(format!("unknown boot mode '{other}'"))),
        }
    }
}

/// Access to the durable boot mode flag
///
/// Implementations must make `set` durable before returning: the update
/// protocol relies on the value surviving a power cut right after the call.
pub trait BootModeRegister: Send + Sync {
    /// Read the current boot mode.
    fn get(&self) -> Result<BootMode>;

    /// Persist a new boot mode.
    fn set(&self, mode: BootMode) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct BootModeRecord {
    mode: BootMode,
    changed_at: chrono::DateTime<chrono::Utc>,
}

/// Boot mode register backed by a small JSON file
///
/// A missing file reads as [`BootMode::Normal`], the factory state.
#[derive(Debug, Clone)]
pub struct FileBootModeRegister {
    path: PathBuf,
}

impl FileBootModeRegister {
    /// Create a register stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp of the last write, if the register has ever been written
    pub fn changed_at(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        Ok(self.read_record()?.map(|r| r.changed_at))
    }

    fn read_record(&self) -> Result<Option<BootModeRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(UpdateError::BootMode(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            UpdateError::BootMode(format!("corrupt register {}: {e}", self.path.display()))
        })
    }
}

impl BootModeRegister for FileBootModeRegister {
    fn get(&self) -> Result<BootMode> {
        let mode = self.read_record()?.map(|r| r.mode).unwrap_or_default();
        debug!(boot_mode = %mode, path = %self.path.display(), "Read boot mode");
        Ok(mode)
    }

    fn set(&self, mode: BootMode) -> Result<()> {
        // Only for the log line; an unreadable old value must not block the write.
        let previous = self.read_record().ok().flatten().map(|r| r.mode);
        let record = BootModeRecord {
            mode,
            changed_at: chrono::Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&record)?;

        write_atomic(&self.path, &data).map_err(|e| {
            UpdateError::BootMode(format!("cannot write {}: {e}", self.path.display()))
        })?;

        info!(
            previous = ?previous,
            boot_mode = %mode,
            path = %self.path.display(),
            "Boot mode persisted"
        );
        Ok(())
    }
}

/// Volatile register for dry runs and tests
///
/// Clones share the same value, and every write is appended to a history so
/// callers can check the order of transitions.
#[derive(Debug, Clone, Default)]
pub struct MemoryBootModeRegister {
    inner: Arc<Mutex<MemoryRegisterState>>,
}

#[derive(Debug, Default)]
struct MemoryRegisterState {
    mode: BootMode,
    writes: Vec<BootMode>,
}

impl MemoryBootModeRegister {
    /// Create a register holding `mode`
    pub fn new(mode: BootMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryRegisterState {
                mode,
                writes: Vec::new(),
            })),
        }
    }

    /// Current value without going through the trait
    pub fn mode(&self) -> BootMode {
        self.inner.lock().mode
    }

    /// Every value written so far, oldest first
    pub fn writes(&self) -> Vec<BootMode> {
        self.inner.lock().writes.clone()
    }
}

impl BootModeRegister for MemoryBootModeRegister {
    fn get(&self) -> Result<BootMode> {
        Ok(self.inner.lock().mode)
    }

    fn set(&self, mode: BootMode) -> Result<()> {
        let mut state = self.inner.lock();
        state.mode = mode;
        state.writes.push(mode);
        Ok(())
    }
}
