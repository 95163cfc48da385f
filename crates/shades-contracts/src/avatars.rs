use std::collections::HashMap;

/// username -> upgraded avatar URL. Lives for the whole process and is never
/// evicted; stale avatars are acceptable.
#[derive(Debug, Clone, Default)]
pub struct ProfileImageCache {
    entries: HashMap<String, String>,
}

impl ProfileImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, username: &str) -> Option<&str> {
        self.entries.get(&cache_key(username)).map(String::as_str)
    }

    /// Stores the high-resolution variant of `url`.
    pub fn insert(&mut self, username: &str, url: &str) -> &str {
        let key = cache_key(username);
        self.entries.insert(key.clone(), upgrade_avatar_url(url));
        self.entries
            .get(&key)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Swaps the `_normal.` thumbnail suffix for the `_400x400.` rendition.
pub fn upgrade_avatar_url(url: &str) -> String {
    url.trim().replacen("_normal.", "_400x400.", 1)
}

fn cache_key(username: &str) -> String {
    username.trim().trim_start_matches('@').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_replaces_thumbnail_marker() {
        assert_eq!(
            upgrade_avatar_url("https://pbs.twimg.com/profile_images/1/abc_normal.jpg"),
            "https://pbs.twimg.com/profile_images/1/abc_400x400.jpg"
        );
        assert_eq!(
            upgrade_avatar_url("https://pbs.twimg.com/profile_images/1/abc.png"),
            "https://pbs.twimg.com/profile_images/1/abc.png"
        );
    }

    #[test]
    fn cache_is_case_insensitive_and_stores_upgraded_url() {
        let mut cache = ProfileImageCache::new();
        cache.insert("Bob", "https://img.example/bob_normal.png");
        assert_eq!(cache.get("bob"), Some("https://img.example/bob_400x400.png"));
        assert_eq!(cache.get("@BOB"), Some("https://img.example/bob_400x400.png"));
        assert_eq!(cache.len(), 1);
    }
}
