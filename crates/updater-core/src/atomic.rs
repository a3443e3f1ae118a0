//! Durable file replacement shared by every small state file the updater owns.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::trace;

/// Replace `path` with `contents` so that a power cut leaves either the old or
/// the new file on disk, never a truncated one.
///
/// The data is written to a sibling temp file, flushed with `sync_all`, renamed
/// over the target and the parent directory entry is synced.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let temp_path = path.with_extension("tmp");
    {
        let mut temp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        temp.write_all(contents)?;
        temp.sync_all()?;
    }
    fs::rename(&temp_path, path)?;

    // Directory fsync is not supported everywhere; the rename already happened.
    if let Ok(dir) = File::open(parent)
        && let Err(e) = dir.sync_all()
    {
        trace!(path = %parent.display(), error = %e, "directory sync skipped");
    }

    Ok(())
}
