use std::collections::HashSet;

use crate::mentions::MentionId;

/// In-memory mirror of mentions the bot has liked remotely. A legacy dedup
/// signal, repopulated at startup; the processed store is authoritative.
#[derive(Debug, Clone, Default)]
pub struct RemoteLikedSet {
    ids: HashSet<MentionId>,
}

impl RemoteLikedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace<I: IntoIterator<Item = MentionId>>(&mut self, ids: I) {
        self.ids = ids.into_iter().collect();
    }

    pub fn contains(&self, id: MentionId) -> bool {
        self.ids.contains(&id)
    }

    pub fn insert(&mut self, id: MentionId) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
