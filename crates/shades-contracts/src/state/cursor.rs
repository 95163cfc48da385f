use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{read_optional, write_atomic};
use crate::mentions::MentionId;

/// Highest mention id fully dispatched, persisted as plain text.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
    current: Option<MentionId>,
}

impl CursorStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let current = match read_optional(&path)? {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<MentionId>()
                    .with_context(|| format!("corrupt cursor file {}", path.display()))?,
            ),
            _ => None,
        };
        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Option<MentionId> {
        self.current
    }

    /// Moves the cursor to `candidate` if that is strictly ahead. Never moves
    /// backwards. Returns whether the stored value changed.
    pub fn advance(&mut self, candidate: MentionId) -> anyhow::Result<bool> {
        if self.current.is_some_and(|current| current >= candidate) {
            return Ok(false);
        }
        write_atomic(&self.path, &candidate.to_string())?;
        self.current = Some(candidate);
        Ok(true)
    }
}
