//! Picks the picture of "the person" for a mention.
//!
//! Priority, first match wins: an attached photo, then the first user
//! mentioned in the text (not the bot, not the author) whose avatar resolves,
//! then the author's own avatar.

use std::collections::HashSet;
use std::fmt;

use shades_contracts::{LookupTables, Mention, ProfileImageCache};
use tracing::{debug, warn};

use crate::api::SocialApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    AttachedPhoto,
    MentionedUser(String),
    AuthorAvatar(String),
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttachedPhoto => write!(f, "attached_photo"),
            Self::MentionedUser(username) => write!(f, "mentioned_user:@{username}"),
            Self::AuthorAvatar(username) => write!(f, "author_avatar:@{username}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub url: String,
    pub source: ImageSource,
}

pub fn resolve_person_image(
    avatars: &mut ProfileImageCache,
    api: &dyn SocialApi,
    bot_handle: &str,
    mention: &Mention,
    tables: &LookupTables,
) -> Option<ResolvedImage> {
    if let Some(url) = first_attached_photo(mention, tables) {
        return Some(ResolvedImage {
            url: url.to_string(),
            source: ImageSource::AttachedPhoto,
        });
    }

    let author = tables.username(&mention.author_id);
    for username in mentioned_candidates(mention, bot_handle, author) {
        if let Some(url) = resolve_avatar(avatars, api, &username) {
            return Some(ResolvedImage {
                url,
                source: ImageSource::MentionedUser(username),
            });
        }
    }

    let author = author?;
    let url = resolve_avatar(avatars, api, author)?;
    Some(ResolvedImage {
        url,
        source: ImageSource::AuthorAvatar(author.to_string()),
    })
}

fn first_attached_photo<'a>(mention: &Mention, tables: &'a LookupTables) -> Option<&'a str> {
    mention
        .media_keys
        .iter()
        .filter_map(|key| tables.media(key))
        .find_map(|item| item.photo_url())
}

/// Mentioned usernames in text order, without the bot, the author, or repeats.
fn mentioned_candidates(mention: &Mention, bot_handle: &str, author: Option<&str>) -> Vec<String> {
    let bot = bot_handle.trim_start_matches('@').to_ascii_lowercase();
    let author = author.map(|name| name.to_ascii_lowercase());
    let mut seen = HashSet::new();
    mention
        .mentioned_usernames
        .iter()
        .map(|name| name.trim().trim_start_matches('@'))
        .filter(|name| !name.is_empty())
        .filter(|name| {
            let lowered = name.to_ascii_lowercase();
            lowered != bot && author.as_deref() != Some(lowered.as_str()) && seen.insert(lowered)
        })
        .map(str::to_string)
        .collect()
}

/// Cache first; on a miss one lookup, upgraded and cached. Lookup errors yield `None`.
pub fn resolve_avatar(
    avatars: &mut ProfileImageCache,
    api: &dyn SocialApi,
    username: &str,
) -> Option<String> {
    if let Some(url) = avatars.get(username) {
        return Some(url.to_string());
    }
    match api.resolve_user_avatar(username) {
        Ok(Some(url)) => {
            let upgraded = avatars.insert(username, &url).to_string();
            debug!(username, url = %upgraded, "resolved avatar");
            Some(upgraded)
        }
        Ok(None) => {
            debug!(username, "user has no avatar");
            None
        }
        Err(err) => {
            warn!(username, error = %err, "avatar lookup failed");
            None
        }
    }
}
