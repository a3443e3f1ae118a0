//! Updater configuration
//!
//! Paths the concrete collaborators operate on. Stored as JSON; a missing file
//! is created with defaults on first load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::boot_mode::FileBootModeRegister;
use crate::error::{Result, UpdateError};
use crate::manifest::{DEFAULT_MANIFEST_FILENAME, TextManifestReader};
use crate::orchestrator::{UpdateLayout, UpdatePorts};
use crate::package::PointerFileLocator;
use crate::progress::ProgressSink;
use crate::resources::{DEFAULT_RESOURCES_ROOT, TarResourceUnpacker};
use crate::store::{DEFAULT_BACKUP_FILENAME, TarStoreBackup};

/// Current configuration schema
pub const CONFIG_SCHEMA_VERSION: &str = "updater.config/1";

/// Complete updater configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Configuration schema version
    pub schema_version: String,

    /// File backing the durable boot mode register
    pub boot_mode_path: PathBuf,

    /// File naming the package currently being applied
    pub package_pointer_path: PathBuf,

    /// Directory holding the persistent settings store
    pub store_root: PathBuf,

    /// External storage root resource bundles are extracted to
    pub resources_root: PathBuf,

    /// Backup archive name inside the package directory
    pub backup_filename: String,

    /// Manifest name inside the package directory
    pub manifest_filename: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            boot_mode_path: PathBuf::from("/var/lib/updater/boot_mode.json"),
            package_pointer_path: PathBuf::from("/int/.update"),
            store_root: PathBuf::from("/int"),
            resources_root: PathBuf::from(DEFAULT_RESOURCES_ROOT),
            backup_filename: DEFAULT_BACKUP_FILENAME.to_string(),
            manifest_filename: DEFAULT_MANIFEST_FILENAME.to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from specific path
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or written when absent.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, creating default");
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let config: UpdaterConfig = serde_json::from_str(&content).map_err(|e| {
            UpdateError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;

        config.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save configuration to specific path
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_vec_pretty(self)?;

        write_atomic(path, &content).map_err(|e| {
            UpdateError::Config(format!("failed to write {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Get default configuration file path
    ///
    /// # Errors
    ///
    /// Fails when the platform has no configuration directory.
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("updater").join("config.json"))
            .ok_or_else(|| UpdateError::Config("no configuration directory".to_string()))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(UpdateError::Config(format!(
                "unsupported schema version '{}'",
                self.schema_version
            )));
        }

        for (key, name) in [
            ("backup_filename", &self.backup_filename),
            ("manifest_filename", &self.manifest_filename),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
                return Err(UpdateError::Config(format!(
                    "{key} must be a plain file name, got '{name}'"
                )));
            }
        }

        if self.backup_filename == self.manifest_filename {
            return Err(UpdateError::Config(
                "backup_filename and manifest_filename must differ".to_string(),
            ));
        }

        if self.store_root == self.resources_root {
            return Err(UpdateError::Config(
                "store_root and resources_root must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Locations handed to the orchestrator
    pub fn layout(&self) -> UpdateLayout {
        UpdateLayout {
            backup_filename: self.backup_filename.clone(),
            resources_root: self.resources_root.clone(),
        }
    }

    /// File-backed collaborators for this configuration
    pub fn ports(&self, progress: Box<dyn ProgressSink>) -> UpdatePorts {
        UpdatePorts {
            register: Box::new(FileBootModeRegister::new(&self.boot_mode_path)),
            locator: Box::new(PointerFileLocator::new(&self.package_pointer_path)),
            store: Box::new(TarStoreBackup::new(&self.store_root)),
            manifests: Box::new(TextManifestReader::new(&self.manifest_filename)),
            unpacker: Box::new(TarResourceUnpacker::new()),
            progress,
        }
    }
}
