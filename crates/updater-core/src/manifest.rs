//! Update package manifest
//!
//! The manifest is a plain `Key: Value` text file at the root of the package.
//! Only a handful of keys matter to the backup/restore phases; the rest are
//! parsed so that a package can be validated before it is armed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, UpdateError};

/// Value of the `Filetype` key every manifest must carry
pub const MANIFEST_FILETYPE: &str = "Flipper firmware upgrade configuration";

/// Default manifest filename inside a package
pub const DEFAULT_MANIFEST_FILENAME: &str = "update.fuf";

/// Oldest manifest format version understood
pub const MIN_MANIFEST_VERSION: u32 = 1;

/// Newest manifest format version understood
pub const MAX_MANIFEST_VERSION: u32 = 2;

/// Parsed package manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version
    pub format_version: u32,

    /// Human readable build description
    pub info: String,

    /// Hardware target number
    pub target: u32,

    /// Firmware image filename
    pub loader: String,

    /// CRC32 of the firmware image, when declared
    pub loader_crc: Option<u32>,

    /// Radio stack image filename, when shipped
    pub radio: Option<String>,

    /// Resource bundle filename, `None` when no bundle ships
    pub resource_bundle_filename: Option<String>,
}

impl Manifest {
    /// Resource bundle filename if the package declares a non-empty one
    pub fn resource_bundle(&self) -> Option<&str> {
        self.resource_bundle_filename
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Check the firmware image against the declared `Loader CRC`.
    ///
    /// Passes without reading the image when no CRC is declared.
    pub fn verify_loader(&self, package_path: &Path) -> Result<()> {
        let Some(expected) = self.loader_crc else {
            return Ok(());
        };

        let path = package_path.join(&self.loader);
        let image = std::fs::read(&path).map_err(|e| {
            UpdateError::Manifest(format!("cannot read loader {}: {e}", path.display()))
        })?;

        let actual = crc32fast::hash(&image);
        if actual != expected {
            return Err(UpdateError::Manifest(format!(
                "loader CRC mismatch for {}: expected {expected:08X}, got {actual:08X}",
                self.loader
            )));
        }
        Ok(())
    }

    /// Parse manifest text
    pub fn parse_str(text: &str) -> Result<Self> {
        let mut fields: HashMap<&str, &str> = HashMap::new();

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(UpdateError::Manifest(format!(
                    "line {}: expected 'Key: Value'",
                    number.saturating_add(1)
                )));
            };

            let key = key.trim();
            if fields.insert(key, value.trim()).is_some() {
                return Err(UpdateError::Manifest(format!("duplicate key '{key}'")));
            }
        }

        let filetype = required(&fields, "Filetype")?;
        if filetype != MANIFEST_FILETYPE {
            return Err(UpdateError::Manifest(format!(
                "unexpected filetype '{filetype}'"
            )));
        }

        let format_version = parse_u32(required(&fields, "Version")?, "Version")?;
        if !(MIN_MANIFEST_VERSION..=MAX_MANIFEST_VERSION).contains(&format_version) {
            return Err(UpdateError::Manifest(format!(
                "unsupported manifest version {format_version}"
            )));
        }

        let loader = required(&fields, "Loader")?;
        check_filename(loader, "Loader")?;

        let loader_crc = fields
            .get("Loader CRC")
            .copied()
            .filter(|v| !v.is_empty())
            .map(parse_crc)
            .transpose()?;

        let radio = optional_filename(&fields, "Radio")?;
        let resource_bundle_filename = optional_filename(&fields, "Resources")?;

        Ok(Self {
            format_version,
            info: required(&fields, "Info")?.to_string(),
            target: parse_u32(required(&fields, "Target")?, "Target")?,
            loader: loader.to_string(),
            loader_crc,
            radio,
            resource_bundle_filename,
        })
    }
}

impl std::str::FromStr for Manifest {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Manifest::parse_str(s)
    }
}

fn required<'a>(fields: &HashMap<&str, &'a str>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .copied()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| UpdateError::Manifest(format!("missing required key '{key}'")))
}

fn optional_filename(fields: &HashMap<&str, &str>, key: &str) -> Result<Option<String>> {
    match fields.get(key).copied().filter(|v| !v.is_empty()) {
        Some(name) => {
            check_filename(name, key)?;
            Ok(Some(name.to_string()))
        }
        None => Ok(None),
    }
}

fn check_filename(name: &str, key: &str) -> Result<()> {
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(UpdateError::Manifest(format!(
            "'{key}' must be a plain file name, got '{name}'"
        )));
    }
    Ok(())
}

fn parse_u32(value: &str, key: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|e| UpdateError::Manifest(format!("'{key}' is not a number: {e}")))
}

/// CRCs are written either as one hex word or as four little-endian hex bytes.
fn parse_crc(value: &str) -> Result<u32> {
    let invalid = |e: std::num::ParseIntError| {
        UpdateError::Manifest(format!("invalid 'Loader CRC' value '{value}': {e}"))
    };

    if value.contains(char::is_whitespace) {
        let bytes = value
            .split_whitespace()
            .map(|b| u8::from_str_radix(b, 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(invalid)?;
        let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|e| {
            UpdateError::Manifest(format!("'Loader CRC' must be 4 bytes: {e}"))
        })?;
        return Ok(u32::from_le_bytes(bytes));
    }

    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).map_err(invalid)
}

/// Parses the manifest of a package directory
pub trait ManifestReader: Send + Sync {
    /// Read and parse the manifest inside `package_path`.
    fn parse(&self, package_path: &Path) -> Result<Manifest>;
}

/// Reads the text manifest from a fixed filename inside the package
#[derive(Debug, Clone)]
pub struct TextManifestReader {
    manifest_filename: String,
}

impl TextManifestReader {
    /// Reader for manifests named `manifest_filename`
    pub fn new(manifest_filename: impl Into<String>) -> Self {
        Self {
            manifest_filename: manifest_filename.into(),
        }
    }

    /// Full path of the manifest for `package_path`
    pub fn manifest_path(&self, package_path: &Path) -> PathBuf {
        package_path.join(&self.manifest_filename)
    }
}

impl Default for TextManifestReader {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST_FILENAME)
    }
}

impl ManifestReader for TextManifestReader {
    fn parse(&self, package_path: &Path) -> Result<Manifest> {
        let path = self.manifest_path(package_path);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            UpdateError::Manifest(format!("cannot read {}: {e}", path.display()))
        })?;

        let manifest = Manifest::parse_str(&text)?;
        debug!(
            path = %path.display(),
            info = %manifest.info,
            resources = ?manifest.resource_bundle(),
            "Parsed update manifest"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
Filetype: Flipper firmware upgrade configuration
Version: 2
Info: f7-update-0.43.1
Target: 7
Loader: firmware.dfu
Loader CRC: 4B 3D 2A 1F
Radio: radio.bin
Resources: resources.tar
";

    #[test]
    fn test_parse_full_manifest() -> Result<()> {
        let manifest = Manifest::parse_str(FULL)?;
        assert_eq!(manifest.format_version, 2);
        assert_eq!(manifest.info, "f7-update-0.43.1");
        assert_eq!(manifest.target, 7);
        assert_eq!(manifest.loader, "firmware.dfu");
        assert_eq!(manifest.loader_crc, Some(0x1F2A_3D4B));
        assert_eq!(manifest.radio.as_deref(), Some("radio.bin"));
        assert_eq!(manifest.resource_bundle(), Some("resources.tar"));
        Ok(())
    }

    #[test]
    fn test_empty_resources_means_no_bundle() -> Result<()> {
        let text = FULL.replace("Resources: resources.tar", "Resources:");
        let manifest = Manifest::parse_str(&text)?;
        assert_eq!(manifest.resource_bundle(), None);

        let text = FULL.replace("Resources: resources.tar\n", "");
        let manifest = Manifest::parse_str(&text)?;
        assert_eq!(manifest.resource_bundle(), None);
        Ok(())
    }

    #[test]
    fn test_word_crc_and_comments() -> Result<()> {
        let text = FULL
            .replace("Loader CRC: 4B 3D 2A 1F", "Loader CRC: 0xDEADBEEF")
            .replace("Radio: radio.bin", "# no radio stack in this build");
        let manifest: Manifest = text.parse()?;
        assert_eq!(manifest.loader_crc, Some(0xDEAD_BEEF));
        assert_eq!(manifest.radio, None);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_filetype() {
        let text = FULL.replace(MANIFEST_FILETYPE, "Flipper SubGhz Key File");
        assert!(matches!(
            Manifest::parse_str(&text),
            Err(UpdateError::Manifest(_))
        ));
    }

    #[test]
    fn test_rejects_missing_loader() {
        let text = FULL.replace("Loader: firmware.dfu\n", "");
        assert!(matches!(
            Manifest::parse_str(&text),
            Err(UpdateError::Manifest(msg)) if msg.contains("Loader")
        ));
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let text = FULL.replace("Version: 2", "Version: 9");
        assert!(matches!(
            Manifest::parse_str(&text),
            Err(UpdateError::Manifest(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_keys_and_bad_lines() {
        let dup = format!("{FULL}Target: 8\n");
        assert!(matches!(
            Manifest::parse_str(&dup),
            Err(UpdateError::Manifest(msg)) if msg.contains("duplicate")
        ));

        let junk = format!("{FULL}garbage line\n");
        assert!(matches!(
            Manifest::parse_str(&junk),
            Err(UpdateError::Manifest(_))
        ));
    }

    #[test]
    fn test_rejects_bundle_outside_package() {
        let text = FULL.replace("resources.tar", "../../int/resources.tar");
        assert!(matches!(
            Manifest::parse_str(&text),
            Err(UpdateError::Manifest(_))
        ));
    }

    #[test]
    fn test_reader_reports_missing_file() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let reader = TextManifestReader::default();
        assert!(matches!(
            reader.parse(dir.path()),
            Err(UpdateError::Manifest(_))
        ));

        std::fs::write(dir.path().join(DEFAULT_MANIFEST_FILENAME), FULL)?;
        assert_eq!(reader.parse(dir.path())?.target, 7);
        Ok(())
    }

    #[test]
    fn test_verify_loader_crc() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        std::fs::write(dir.path().join("firmware.dfu"), b"DfuSe")?;

        let crc = crc32fast::hash(b"DfuSe");
        let text = FULL.replace("Loader CRC: 4B 3D 2A 1F", &format!("Loader CRC: {crc:08X}"));
        let manifest = Manifest::parse_str(&text)?;
        manifest.verify_loader(dir.path())?;

        std::fs::write(dir.path().join("firmware.dfu"), b"tampered")?;
        assert!(matches!(
            manifest.verify_loader(dir.path()),
            Err(UpdateError::Manifest(msg)) if msg.contains("mismatch")
        ));
        Ok(())
    }

    #[test]
    fn test_verify_loader_without_crc_skips_read() -> Result<()> {
        let text = FULL.replace("Loader CRC: 4B 3D 2A 1F\n", "");
        let manifest = Manifest::parse_str(&text)?;
        manifest.verify_loader(Path::new("/nonexistent"))
    }
}
