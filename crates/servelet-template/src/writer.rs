//! Atomic file writes

use servelet_core::{ServeletError, ServeletResult};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Write `contents` to `path` so readers see either the old file or the new one
///
/// The data goes to a temporary file in the destination directory, is synced,
/// and is then renamed over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> ServeletResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        ServeletError::Io(std::io::Error::new(
            e.error.kind(),
            format!("Failed to move rendered file into {}: {}", path.display(), e.error),
        ))
    })?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}
