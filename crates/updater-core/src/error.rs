//! Error types for backup/restore update phases

use std::path::PathBuf;
use thiserror::Error;

/// Coarse failure classes used by boot sequencing to decide what to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// No update context: the package could not be located or the register
    /// could not be read. The boot mode is left untouched.
    Context,
    /// The update manifest could not be parsed.
    Format,
    /// A backup, restore or resource I/O step failed.
    Io,
}

/// Errors that can occur while running an update phase
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The package currently being applied could not be resolved
    #[error("Update package unavailable: {0}")]
    PackageUnavailable(String),

    /// The boot mode register could not be read or written
    #[error("Boot mode register error: {0}")]
    BootMode(String),

    /// The package manifest is missing or malformed
    #[error("Invalid update manifest: {0}")]
    Manifest(String),

    /// Persistent store backup failed
    #[error("Settings backup to {path} failed: {reason}")]
    Backup {
        /// Destination of the backup archive
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Persistent store restore failed
    #[error("Settings restore from {path} failed: {reason}")]
    Restore {
        /// Source backup archive
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// The resource bundle could not be opened for reading
    #[error("Cannot open resource bundle {path}: {reason}")]
    ResourceOpen {
        /// Bundle path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Extracting the resource bundle failed part way
    #[error("Resource extraction failed: {0}")]
    ResourceExtract(String),

    /// Configuration is invalid or unreadable
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl UpdateError {
    /// Map this error onto the failure taxonomy of the update protocol.
    pub fn class(&self) -> ErrorClass {
        match self {
            UpdateError::PackageUnavailable(_)
            | UpdateError::BootMode(_)
            | UpdateError::Config(_) => ErrorClass::Context,
            UpdateError::Manifest(_) | UpdateError::Serialization(_) => ErrorClass::Format,
            UpdateError::Backup { .. }
            | UpdateError::Restore { .. }
            | UpdateError::ResourceOpen { .. }
            | UpdateError::ResourceExtract(_)
            | UpdateError::Io(_) => ErrorClass::Io,
        }
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        UpdateError::Serialization(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            UpdateError::PackageUnavailable("gone".to_string()).class(),
            ErrorClass::Context
        );
        assert_eq!(
            UpdateError::Manifest("bad".to_string()).class(),
            ErrorClass::Format
        );
        assert_eq!(
            UpdateError::Restore {
                path: PathBuf::from("backup.tar"),
                reason: "eof".to_string(),
            }
            .class(),
            ErrorClass::Io
        );
    }

    #[test]
    fn test_display_includes_path() {
        let err = UpdateError::Backup {
            path: PathBuf::from("/ext/update/backup.tar"),
            reason: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Settings backup to /ext/update/backup.tar failed: disk full"
        );
    }
}
