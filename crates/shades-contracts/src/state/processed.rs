use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tracing::warn;

use super::{read_optional, write_atomic};
use crate::mentions::MentionId;

pub const DEFAULT_PROCESSED_CAPACITY: usize = 1000;

/// Bounded, insertion-ordered set of mention ids that must never be acted on
/// again. Persisted as newline-separated ids, oldest first, and rewritten in
/// full on every addition.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    path: PathBuf,
    capacity: usize,
    ids: IndexSet<MentionId>,
}

impl ProcessedStore {
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> anyhow::Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            capacity: capacity.max(1),
            ids: IndexSet::new(),
        };
        if let Some(raw) = read_optional(&store.path)? {
            for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
                match line.parse::<MentionId>() {
                    Ok(id) => {
                        store.ids.shift_remove(&id);
                        store.ids.insert(id);
                    }
                    Err(err) => warn!(path = %store.path.display(), "skipping line: {err:#}"),
                }
            }
            store.evict_overflow();
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: MentionId) -> bool {
        self.ids.contains(&id)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = MentionId> + '_ {
        self.ids.iter().copied()
    }

    /// Records `id` and persists. An id already present is left where it is
    /// and nothing is written.
    pub fn record(&mut self, id: MentionId) -> anyhow::Result<bool> {
        if !self.ids.insert(id) {
            return Ok(false);
        }
        self.evict_overflow();
        self.flush()?;
        Ok(true)
    }

    fn evict_overflow(&mut self) {
        while self.ids.len() > self.capacity {
            self.ids.shift_remove_index(0);
        }
    }

    fn flush(&self) -> anyhow::Result<()> {
        let mut body = String::with_capacity(self.ids.len() * 20);
        for id in &self.ids {
            body.push_str(&id.to_string());
            body.push('\n');
        }
        write_atomic(&self.path, &body)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn missing_file_opens_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ProcessedStore::open(temp.path().join("processed"), 10)?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn record_persists_and_reloads_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("processed");
        let mut store = ProcessedStore::open(&path, 10)?;
        assert!(store.record(MentionId(5))?);
        assert!(store.record(MentionId(3))?);
        assert!(!store.record(MentionId(5))?);
        assert_eq!(std::fs::read_to_string(&path)?, "5\n3\n");

        let reloaded = ProcessedStore::open(&path, 10)?;
        assert_eq!(
            reloaded.iter().collect::<Vec<_>>(),
            vec![MentionId(5), MentionId(3)]
        );
        Ok(())
    }

    #[test]
    fn overflow_evicts_oldest_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("processed");
        let mut store = ProcessedStore::open(&path, 3)?;
        for id in [10, 11, 12, 13, 14] {
            store.record(MentionId(id))?;
        }
        assert_eq!(store.len(), 3);
        assert!(!store.contains(MentionId(10)));
        assert!(!store.contains(MentionId(11)));
        assert!(store.contains(MentionId(14)));
        assert_eq!(std::fs::read_to_string(&path)?, "12\n13\n14\n");
        Ok(())
    }

    #[test]
    fn reopening_with_smaller_capacity_keeps_most_recent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("processed");
        std::fs::write(&path, "1\n2\nbogus\n3\n4\n")?;
        let store = ProcessedStore::open(&path, 2)?;
        assert_eq!(
            store.iter().collect::<Vec<_>>(),
            vec![MentionId(3), MentionId(4)]
        );
        Ok(())
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(
            capacity in 1usize..16,
            ids in proptest::collection::vec(0u64..64, 0..80),
        ) {
            let temp = tempfile::tempdir().unwrap();
            let mut store = ProcessedStore::open(temp.path().join("processed"), capacity).unwrap();
            for id in &ids {
                store.record(MentionId(*id)).unwrap();
                prop_assert!(store.len() <= capacity);
                prop_assert!(store.contains(MentionId(*id)));
            }
        }
    }
}
