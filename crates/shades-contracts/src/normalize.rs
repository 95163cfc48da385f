//! Flattens a mention-search response into the fixed internal shape.
//!
//! `includes` collections show up either as arrays of objects or as objects
//! keyed by identifier, and identifiers arrive as strings or numbers. Both
//! collapse here; nothing downstream looks at the wire shape.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::avatars::ProfileImageCache;
use crate::mentions::{MediaItem, MediaKind, Mention, MentionId};

#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    pub usernames: HashMap<String, String>,
    pub media: HashMap<String, MediaItem>,
}

impl LookupTables {
    pub fn username(&self, user_id: &str) -> Option<&str> {
        self.usernames.get(user_id).map(String::as_str)
    }

    pub fn media(&self, media_key: &str) -> Option<&MediaItem> {
        self.media.get(media_key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub mentions: Vec<Mention>,
    pub tables: LookupTables,
}

pub fn normalize_batch(response: &Value, avatars: &mut ProfileImageCache) -> NormalizedBatch {
    NormalizedBatch {
        mentions: parse_mentions(response.get("data")),
        tables: lookup_tables(response.get("includes"), avatars),
    }
}

/// Builds user and media tables. Avatar URLs found along the way are cached.
pub fn lookup_tables(includes: Option<&Value>, avatars: &mut ProfileImageCache) -> LookupTables {
    let mut tables = LookupTables::default();

    for (key, user) in collection(includes, "users") {
        let Some(id) = user.get("id").and_then(value_as_id).or(key) else {
            continue;
        };
        let Some(username) = non_empty_str(user.get("username")) else {
            continue;
        };
        if let Some(avatar) = non_empty_str(user.get("profile_image_url")) {
            avatars.insert(&username, &avatar);
        }
        tables.usernames.insert(id, username);
    }

    for (key, media) in collection(includes, "media") {
        let Some(media_key) = non_empty_str(media.get("media_key")).or(key) else {
            continue;
        };
        let kind = media
            .get("type")
            .and_then(Value::as_str)
            .map(MediaKind::parse)
            .unwrap_or(MediaKind::Other);
        tables.media.insert(
            media_key.clone(),
            MediaItem {
                media_key,
                kind,
                url: non_empty_str(media.get("url")),
            },
        );
    }

    tables
}

pub fn parse_mentions(data: Option<&Value>) -> Vec<Mention> {
    let Some(rows) = data.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter().filter_map(parse_mention).collect()
}

fn parse_mention(row: &Value) -> Option<Mention> {
    let raw_id = row.get("id").and_then(value_as_id)?;
    let id = match raw_id.parse::<MentionId>() {
        Ok(id) => id,
        Err(err) => {
            warn!("dropping mention with unusable id: {err:#}");
            return None;
        }
    };
    let author_id = row
        .get("author_id")
        .and_then(value_as_id)
        .unwrap_or_default();

    Some(Mention {
        id,
        author_id,
        text: row
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        media_keys: media_keys(row.get("attachments")),
        mentioned_usernames: tagged_usernames(row.get("entities")),
        created_at: non_empty_str(row.get("created_at")),
    })
}

fn media_keys(attachments: Option<&Value>) -> Vec<String> {
    let keys = match attachments {
        Some(Value::Array(keys)) => Some(keys),
        Some(Value::Object(obj)) => obj.get("media_keys").and_then(Value::as_array),
        _ => None,
    };
    keys.map(|keys| keys.iter().filter_map(value_as_id).collect())
        .unwrap_or_default()
}

fn tagged_usernames(entities: Option<&Value>) -> Vec<String> {
    let Some(tags) = entities
        .and_then(|entities| entities.get("mentions"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    tags.iter()
        .filter_map(|tag| match tag {
            Value::String(name) => Some(name.clone()),
            other => other
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .map(|name| name.trim().trim_start_matches('@').to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Entries of `includes[key]` paired with their map key, when keyed.
fn collection<'a>(includes: Option<&'a Value>, key: &str) -> Vec<(Option<String>, &'a Value)> {
    match includes.and_then(|includes| includes.get(key)) {
        Some(Value::Array(rows)) => rows.iter().map(|row| (None, row)).collect(),
        Some(Value::Object(rows)) => rows
            .iter()
            .map(|(key, row)| (Some(key.clone()), row))
            .collect(),
        _ => Vec::new(),
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.trim().to_string()).filter(|raw| !raw.is_empty()),
        Value::Number(number) => number.as_u64().map(|id| id.to_string()),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
