//! Backup and restore of the persistent settings store

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, UpdateError};

/// Default backup archive name inside the package directory
pub const DEFAULT_BACKUP_FILENAME: &str = "backup.tar";

/// Serializes the settings store to one file and back
pub trait StoreBackup: Send + Sync {
    /// Write a full snapshot of the store to `destination`.
    fn backup(&self, destination: &Path) -> Result<()>;

    /// Replace the store contents with the snapshot at `source`.
    fn restore(&self, source: &Path) -> Result<()>;
}

/// Store snapshot as a tar archive of a settings directory
#[derive(Debug, Clone)]
pub struct TarStoreBackup {
    store_root: PathBuf,
}

impl TarStoreBackup {
    /// Back up everything under `store_root`
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
        }
    }

    /// Directory being snapshotted
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    fn write_archive(&self, destination: &Path) -> io::Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(destination)?;
        // The package may live inside the store; never archive the archive.
        let skip = destination.canonicalize()?;
        let root = self.store_root.canonicalize()?;

        let mut builder = tar::Builder::new(BufWriter::new(file));
        builder.follow_symlinks(false);
        append_tree(&mut builder, &root, &root, &skip)?;

        let mut writer = builder.into_inner()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn unpack_archive(&self, source: &Path) -> io::Result<()> {
        let file = File::open(source)?;
        fs::create_dir_all(&self.store_root)?;

        let mut archive = tar::Archive::new(BufReader::new(file));
        archive.set_overwrite(true);
        archive.set_preserve_mtime(true);
        archive.unpack(&self.store_root)
    }
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    dir: &Path,
    skip: &Path,
) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        if path == skip {
            debug!(path = %path.display(), "Skipping backup archive inside store");
            continue;
        }

        let name = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        if entry.file_type()?.is_dir() {
            builder.append_dir(name, &path)?;
            append_tree(builder, root, &path, skip)?;
        } else {
            builder.append_path_with_name(&path, name)?;
        }
    }
    Ok(())
}

impl StoreBackup for TarStoreBackup {
    fn backup(&self, destination: &Path) -> Result<()> {
        debug!(
            store = %self.store_root.display(),
            destination = %destination.display(),
            "Creating settings backup"
        );

        if !self.store_root.is_dir() {
            return Err(UpdateError::Backup {
                path: destination.to_path_buf(),
                reason: format!("store {} is not a directory", self.store_root.display()),
            });
        }

        self.write_archive(destination)
            .map_err(|e| UpdateError::Backup {
                path: destination.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!(destination = %destination.display(), "Settings backup written");
        Ok(())
    }

    fn restore(&self, source: &Path) -> Result<()> {
        debug!(
            store = %self.store_root.display(),
            source = %source.display(),
            "Restoring settings backup"
        );

        self.unpack_archive(source)
            .map_err(|e| UpdateError::Restore {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!(source = %source.display(), "Settings restored");
        Ok(())
    }
}
