//! On-disk fixtures for end-to-end tests
//!
//! A [`PackageFixture`] lays out a throwaway device under a temp directory:
//!
//! ```text
//! <tmp>/int/            settings store (seeded), holds the package pointer
//! <tmp>/ext/            resources root
//! <tmp>/ext/update/pkg/ package: update.fuf, firmware.dfu, optional resources.tar
//! <tmp>/boot_mode.json  boot mode register
//! <tmp>/config.json     updater configuration pointing at all of the above
//! ```

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use updater_core::error::Result;
use updater_core::prelude::*;

/// Files the settings store is seeded with
pub const SEED_FILES: &[(&str, &[u8])] = &[
    ("bt.settings", b"bt:on"),
    ("desktop.settings", b"pin:1234"),
    ("dolphin/state", b"level=3"),
];

/// Firmware image named by the manifest
pub const LOADER_FILENAME: &str = "firmware.dfu";

/// Bundle name written into the manifest when a bundle is present
pub const BUNDLE_FILENAME: &str = "resources.tar";

/// Write a plain tar archive containing `files`.
pub fn write_tar(path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
    let mut builder = tar::Builder::new(File::create(path)?);
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data)?;
    }
    builder.into_inner()?.sync_all()
}

/// Contents of the firmware image
pub const LOADER_IMAGE: &[u8] = b"DfuSe\x01\x00\x00";

fn manifest_text(bundle: Option<&str>) -> String {
    let mut text = format!(
        "Filetype: Flipper firmware upgrade configuration\n\
         Version: 2\n\
         Info: f7-update-test\n\
         Target: 7\n\
         Loader: {LOADER_FILENAME}\n\
         Loader CRC: 0x{:08X}\n",
        crc32fast::hash(LOADER_IMAGE)
    );
    if let Some(bundle) = bundle {
        text.push_str(&format!("Resources: {bundle}\n"));
    }
    text
}

/// Temporary device layout with a staged update package
pub struct PackageFixture {
    dir: TempDir,
    pub config: UpdaterConfig,
    pub config_path: PathBuf,
    pub package_dir: PathBuf,
}

impl PackageFixture {
    /// Package without a resource bundle
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// Package shipping a bundle with `files`
    pub fn with_bundle(files: &[(&str, &[u8])]) -> Result<Self> {
        Self::build(Some(files))
    }

    fn build(bundle: Option<&[(&str, &[u8])]>) -> Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();

        let config = UpdaterConfig {
            boot_mode_path: root.join("boot_mode.json"),
            package_pointer_path: root.join("int").join(".update"),
            store_root: root.join("int"),
            resources_root: root.join("ext"),
            ..UpdaterConfig::default()
        };

        for (name, data) in SEED_FILES {
            let path = config.store_root.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, data)?;
        }

        let package_dir = config.resources_root.join("update").join("pkg");
        fs::create_dir_all(&package_dir)?;

        fs::write(package_dir.join(LOADER_FILENAME), LOADER_IMAGE)?;

        let bundle_name = bundle.map(|_| BUNDLE_FILENAME);
        fs::write(
            package_dir.join(&config.manifest_filename),
            manifest_text(bundle_name),
        )?;
        if let Some(files) = bundle {
            write_tar(&package_dir.join(BUNDLE_FILENAME), files)?;
        }

        PointerFileLocator::new(&config.package_pointer_path).write_pointer(&package_dir)?;

        let config_path = root.join("config.json");
        config.save_to_path(&config_path)?;

        Ok(Self {
            dir,
            config,
            config_path,
            package_dir,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_root(&self) -> &Path {
        &self.config.store_root
    }

    pub fn resources_root(&self) -> &Path {
        &self.config.resources_root
    }

    pub fn backup_path(&self) -> PathBuf {
        self.package_dir.join(&self.config.backup_filename)
    }

    pub fn register(&self) -> FileBootModeRegister {
        FileBootModeRegister::new(&self.config.boot_mode_path)
    }

    pub fn boot_mode(&self) -> Result<BootMode> {
        self.register().get()
    }

    pub fn set_boot_mode(&self, mode: BootMode) -> Result<()> {
        self.register().set(mode)
    }

    /// Orchestrator over the file-backed collaborators
    pub fn orchestrator(&self, progress: Box<dyn ProgressSink>) -> UpdateOrchestrator {
        UpdateOrchestrator::new(self.config.ports(progress), self.config.layout())
    }

    /// Remove every seeded settings file, as a full flash would.
    pub fn wipe_store(&self) -> Result<()> {
        for (name, _) in SEED_FILES {
            let path = self.store_root().join(name);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
