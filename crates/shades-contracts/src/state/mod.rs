pub mod cursor;
pub mod liked;
pub mod processed;

use std::io::Write;
use std::path::Path;

use anyhow::Context;

pub use cursor::CursorStore;
pub use liked::RemoteLikedSet;
pub use processed::ProcessedStore;

/// Replaces `path` with `contents` via a sibling temp file and a rename, so a
/// crash mid-write leaves either the old file or the new one.
fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage write for {}", path.display()))?;
    staged.write_all(contents.as_bytes())?;
    staged.flush()?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Reads a state file; a missing file is first-run state, not an error.
fn read_optional(path: &Path) -> anyhow::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
