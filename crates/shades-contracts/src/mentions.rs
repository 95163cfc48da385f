use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Mention identifier. Transmitted as text, always compared as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MentionId(pub u64);

impl MentionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl FromStr for MentionId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim()
            .parse::<u64>()
            .map(MentionId)
            .with_context(|| format!("invalid mention id '{raw}'"))
    }
}

impl fmt::Display for MentionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MentionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub id: MentionId,
    pub author_id: String,
    pub text: String,
    pub media_keys: Vec<String>,
    /// Usernames tagged in the text, in text order, without the leading `@`.
    pub mentioned_usernames: Vec<String>,
    pub created_at: Option<String>,
}

impl Mention {
    pub fn new(id: impl Into<MentionId>, author_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author_id: author_id.into(),
            text: String::new(),
            media_keys: Vec::new(),
            mentioned_usernames: Vec::new(),
            created_at: None,
        }
    }

    pub fn with_media_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.media_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mentions<I, S>(mut self, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentioned_usernames = usernames.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_attachments(&self) -> bool {
        !self.media_keys.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
    Other,
}

impl MediaKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "animated_gif" => Self::AnimatedGif,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub media_key: String,
    pub kind: MediaKind,
    pub url: Option<String>,
}

impl MediaItem {
    /// Direct URL, only for photos. Videos and gifs are never actionable.
    pub fn photo_url(&self) -> Option<&str> {
        if self.kind != MediaKind::Photo {
            return None;
        }
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
