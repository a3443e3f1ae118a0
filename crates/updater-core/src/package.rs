//! Locating the update package currently being applied

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::error::{Result, UpdateError};

/// Resolves the directory of the package being applied
pub trait PackageLocator: Send + Sync {
    /// Return the package directory, or [`UpdateError::PackageUnavailable`].
    fn resolve_current_package_path(&self) -> Result<PathBuf>;
}

/// Locator reading a one-line pointer file
///
/// The pointer holds either the package directory or the path of a file
/// inside it (usually the manifest), in which case the parent is used.
#[derive(Debug, Clone)]
pub struct PointerFileLocator {
    pointer_path: PathBuf,
}

impl PointerFileLocator {
    /// Create a locator reading `pointer_path`
    pub fn new(pointer_path: impl Into<PathBuf>) -> Self {
        Self {
            pointer_path: pointer_path.into(),
        }
    }

    /// Location of the pointer file
    pub fn pointer_path(&self) -> &Path {
        &self.pointer_path
    }

    /// Record `package_dir` as the package to apply on the next update boot
    ///
    /// # Errors
    ///
    /// Fails if `package_dir` is not a directory, is not valid UTF-8, or the
    /// pointer cannot be written.
    pub fn write_pointer(&self, package_dir: &Path) -> Result<()> {
        if !package_dir.is_dir() {
            return Err(UpdateError::PackageUnavailable(format!(
                "{} is not a directory",
                package_dir.display()
            )));
        }

        // The pointer is a text line; a lossy path would never resolve again.
        let Some(path) = package_dir.to_str() else {
            return Err(UpdateError::PackageUnavailable(format!(
                "{} is not valid UTF-8",
                package_dir.display()
            )));
        };
        let line = format!("{path}\n");
        write_atomic(&self.pointer_path, line.as_bytes())?;

        info!(
            package = %package_dir.display(),
            pointer = %self.pointer_path.display(),
            "Recorded update package"
        );
        Ok(())
    }

    /// Forget the recorded package
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.pointer_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PackageLocator for PointerFileLocator {
    fn resolve_current_package_path(&self) -> Result<PathBuf> {
        let content = std::fs::read_to_string(&self.pointer_path).map_err(|e| {
            UpdateError::PackageUnavailable(format!(
                "cannot read package pointer {}: {e}",
                self.pointer_path.display()
            ))
        })?;

        let target = content.lines().next().map(str::trim).unwrap_or_default();
        if target.is_empty() {
            return Err(UpdateError::PackageUnavailable(format!(
                "package pointer {} is empty",
                self.pointer_path.display()
            )));
        }

        let target = PathBuf::from(target);
        let package_dir = if target.is_file() {
            target
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    UpdateError::PackageUnavailable(format!(
                        "{} has no parent directory",
                        target.display()
                    ))
                })?
        } else {
            target
        };

        if !package_dir.is_dir() {
            return Err(UpdateError::PackageUnavailable(format!(
                "package directory {} does not exist",
                package_dir.display()
            )));
        }

        debug!(package = %package_dir.display(), "Resolved update package");
        Ok(package_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolves_directory_pointer() -> Result<()> {
        let dir = TempDir::new()?;
        let package = dir.path().join("f7-update-0.43.1");
        std::fs::create_dir(&package)?;

        let locator = PointerFileLocator::new(dir.path().join(".update"));
        locator.write_pointer(&package)?;

        assert_eq!(locator.resolve_current_package_path()?, package);
        Ok(())
    }

    #[test]
    fn test_resolves_manifest_pointer_to_parent() -> Result<()> {
        let dir = TempDir::new()?;
        let package = dir.path().join("pkg");
        std::fs::create_dir(&package)?;
        let manifest = package.join("update.fuf");
        std::fs::write(&manifest, "Filetype: x\n")?;

        let pointer = dir.path().join(".update");
        std::fs::write(&pointer, format!("{}\n", manifest.display()))?;

        let locator = PointerFileLocator::new(pointer);
        assert_eq!(locator.resolve_current_package_path()?, package);
        Ok(())
    }

    #[test]
    fn test_missing_pointer_is_unavailable() -> Result<()> {
        let dir = TempDir::new()?;
        let locator = PointerFileLocator::new(dir.path().join(".update"));

        assert!(matches!(
            locator.resolve_current_package_path(),
            Err(UpdateError::PackageUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_empty_or_dangling_pointer_is_unavailable() -> Result<()> {
        let dir = TempDir::new()?;
        let pointer = dir.path().join(".update");
        let locator = PointerFileLocator::new(&pointer);

        std::fs::write(&pointer, "   \n")?;
        assert!(matches!(
            locator.resolve_current_package_path(),
            Err(UpdateError::PackageUnavailable(_))
        ));

        std::fs::write(&pointer, dir.path().join("missing").display().to_string())?;
        assert!(matches!(
            locator.resolve_current_package_path(),
            Err(UpdateError::PackageUnavailable(_))
        ));
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_package_is_rejected() -> Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new()?;
        let package = dir.path().join(OsStr::from_bytes(b"pkg-\xff"));
        std::fs::create_dir(&package)?;
        let locator = PointerFileLocator::new(dir.path().join(".update"));

        assert!(matches!(
            locator.write_pointer(&package),
            Err(UpdateError::PackageUnavailable(_))
        ));
        assert!(!locator.pointer_path().exists());
        Ok(())
    }

    #[test]
    fn test_clear_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let package = dir.path().join("pkg");
        std::fs::create_dir(&package)?;
        let locator = PointerFileLocator::new(dir.path().join(".update"));

        locator.write_pointer(&package)?;
        locator.clear()?;
        locator.clear()?;
        assert!(!locator.pointer_path().exists());
        Ok(())
    }
}
