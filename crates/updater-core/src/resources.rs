//! Resource bundle extraction
//!
//! A resource bundle is an optional archive of loose files shipped next to the
//! firmware image. It is unpacked onto external storage after the settings
//! store has been restored.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Result, UpdateError};

/// Mount root extracted bundles land in
pub const DEFAULT_RESOURCES_ROOT: &str = "/ext";

/// Callback invoked in-line for every archive entry during extraction
pub trait UnpackObserver {
    /// Called before `name` is written. Returning `false` skips the entry.
    fn on_entry(&mut self, name: &str, is_directory: bool) -> bool;
}

impl<F> UnpackObserver for F
where
    F: FnMut(&str, bool) -> bool,
{
    fn on_entry(&mut self, name: &str, is_directory: bool) -> bool {
        self(name, is_directory)
    }
}

/// An opened bundle
pub trait ResourceArchive {
    /// Number of entries (files and directories) in the bundle.
    fn entry_count(&mut self) -> Result<usize>;

    /// Extract every entry below `destination`, reporting each to `observer`.
    ///
    /// Either all accepted entries are written or the call fails as a whole.
    fn extract_all(&mut self, destination: &Path, observer: &mut dyn UnpackObserver)
    -> Result<()>;
}

/// Opens resource bundles for reading
pub trait ResourceUnpacker: Send + Sync {
    /// Open the bundle at `path`; failure to read it is
    /// [`UpdateError::ResourceOpen`].
    fn open(&self, path: &Path) -> Result<Box<dyn ResourceArchive>>;
}

/// Unpacker for plain or gzip-compressed tar bundles
#[derive(Debug, Clone, Copy, Default)]
pub struct TarResourceUnpacker;

impl TarResourceUnpacker {
    /// Create an unpacker
    pub fn new() -> Self {
        Self
    }
}

impl ResourceUnpacker for TarResourceUnpacker {
    fn open(&self, path: &Path) -> Result<Box<dyn ResourceArchive>> {
        let bundle = TarBundle {
            path: path.to_path_buf(),
            compressed: is_gzip_name(path),
        };

        bundle.validate().map_err(|e| UpdateError::ResourceOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        debug!(bundle = %path.display(), compressed = bundle.compressed, "Opened resource bundle");
        Ok(Box::new(bundle))
    }
}

fn is_gzip_name(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

struct TarBundle {
    path: PathBuf,
    compressed: bool,
}

impl TarBundle {
    fn archive(&self) -> std::io::Result<tar::Archive<Box<dyn Read>>> {
        let file = BufReader::new(File::open(&self.path)?);
        let reader: Box<dyn Read> = if self.compressed {
            Box::new(flate2::read::GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(tar::Archive::new(reader))
    }

    /// Opening succeeds when the first header (if any) decodes.
    fn validate(&self) -> std::io::Result<()> {
        let mut archive = self.archive()?;
        let mut entries = archive.entries()?;
        if let Some(first) = entries.next() {
            first?;
        }
        Ok(())
    }
}

impl ResourceArchive for TarBundle {
    fn entry_count(&mut self) -> Result<usize> {
        let count_entries = || -> std::io::Result<usize> {
            let mut archive = self.archive()?;
            let mut count = 0usize;
            for entry in archive.entries()? {
                entry?;
                count = count.saturating_add(1);
            }
            Ok(count)
        };

        count_entries().map_err(|e| UpdateError::ResourceOpen {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn extract_all(
        &mut self,
        destination: &Path,
        observer: &mut dyn UnpackObserver,
    ) -> Result<()> {
        let extract_err = |e: std::io::Error| {
            UpdateError::ResourceExtract(format!("{}: {e}", self.path.display()))
        };

        fs::create_dir_all(destination).map_err(extract_err)?;

        let mut archive = self.archive().map_err(extract_err)?;
        archive.set_overwrite(true);

        for entry in archive.entries().map_err(extract_err)? {
            let mut entry = entry.map_err(extract_err)?;
            let name = entry.path().map_err(extract_err)?.to_string_lossy().into_owned();
            let is_directory = entry.header().entry_type().is_dir();

            if !observer.on_entry(&name, is_directory) {
                trace!(entry = %name, "Skipping bundle entry");
                continue;
            }

            if !entry.unpack_in(destination).map_err(extract_err)? {
                return Err(UpdateError::ResourceExtract(format!(
                    "entry '{name}' escapes {}",
                    destination.display()
                )));
            }
            trace!(entry = %name, is_directory, "Extracted bundle entry");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_bundle(path: &Path, files: &[(&str, &[u8])]) -> std::io::Result<()> {
        let mut builder = tar::Builder::new(File::create(path)?);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data)?;
        }
        builder.finish()
    }

    #[test]
    fn test_counts_and_extracts_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let bundle = dir.path().join("resources.tar");
        write_bundle(
            &bundle,
            &[
                ("dolphin/manifest.txt", b"Filetype: Dolphin"),
                ("subghz/assets/keeloq", b"keys"),
                ("Manifest", b"V:0"),
            ],
        )?;

        let mut archive = TarResourceUnpacker::new().open(&bundle)?;
        assert_eq!(archive.entry_count()?, 3);

        let dest = dir.path().join("ext");
        let mut seen = Vec::new();
        let mut observer = |name: &str, _is_dir: bool| {
            seen.push(name.to_string());
            true
        };
        archive.extract_all(&dest, &mut observer)?;

        assert_eq!(
            seen,
            vec!["dolphin/manifest.txt", "subghz/assets/keeloq", "Manifest"]
        );
        assert_eq!(fs::read(dest.join("subghz/assets/keeloq"))?, b"keys");
        Ok(())
    }

    #[test]
    fn test_observer_can_skip_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let bundle = dir.path().join("resources.tar");
        write_bundle(&bundle, &[("keep.txt", b"1"), ("skip.txt", b"2")])?;

        let mut archive = TarResourceUnpacker::new().open(&bundle)?;
        let dest = dir.path().join("ext");
        let mut observer = |name: &str, _is_dir: bool| name != "skip.txt";
        archive.extract_all(&dest, &mut observer)?;

        assert!(dest.join("keep.txt").exists());
        assert!(!dest.join("skip.txt").exists());
        Ok(())
    }

    #[test]
    fn test_gzip_bundle() -> Result<()> {
        let dir = TempDir::new()?;
        let plain = dir.path().join("plain.tar");
        write_bundle(&plain, &[("a.txt", b"alpha")])?;

        let bundle = dir.path().join("resources.tar.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(File::create(&bundle)?, flate2::Compression::default());
        std::io::copy(&mut File::open(&plain)?, &mut encoder)?;
        encoder.finish()?;

        let mut archive = TarResourceUnpacker::new().open(&bundle)?;
        assert_eq!(archive.entry_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_empty_bundle_has_no_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let bundle = dir.path().join("resources.tar");
        write_bundle(&bundle, &[])?;

        let mut archive = TarResourceUnpacker::new().open(&bundle)?;
        assert_eq!(archive.entry_count()?, 0);
        Ok(())
    }

    #[test]
    fn test_open_missing_bundle_fails() -> Result<()> {
        let dir = TempDir::new()?;
        let result = TarResourceUnpacker::new().open(&dir.path().join("resources.tar"));
        assert!(matches!(result, Err(UpdateError::ResourceOpen { .. })));
        Ok(())
    }

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip_name(Path::new("resources.tar.gz")));
        assert!(is_gzip_name(Path::new("RES.TGZ")));
        assert!(!is_gzip_name(Path::new("resources.tar")));
    }
}
