use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use shades_contracts::{MentionId, User};
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::http::{build_client, response_json_or_error};

pub const SEARCH_PAGE_SIZE: u32 = 50;
pub const LIKED_PAGE_SIZE: usize = 100;

const SEARCH_TWEET_FIELDS: &str = "id,author_id,attachments,created_at,entities";
const SEARCH_EXPANSIONS: &str = "author_id,attachments.media_keys";
const SEARCH_MEDIA_FIELDS: &str = "url,type,preview_image_url";
const SEARCH_USER_FIELDS: &str = "username,profile_image_url";

/// Calls the bot makes against the social platform.
///
/// Everything is blocking; the poll loop is single-threaded and waits on each
/// call in turn.
pub trait SocialApi {
    /// Raw search response for mentions newer than `since`.
    fn search_mentions(&self, handle: &str, since: Option<MentionId>) -> Result<Value>;

    fn get_me(&self) -> Result<User>;

    /// Avatar URL for a username. `Ok(None)` when the user exists without one.
    fn resolve_user_avatar(&self, username: &str) -> Result<Option<String>>;

    /// Most recent liked post ids, newest first, at most `limit`.
    fn liked_mention_ids(&self, user_id: &str, limit: usize) -> Result<Vec<MentionId>>;

    fn like_mention(&self, user_id: &str, id: MentionId) -> Result<()>;

    /// Uploads an image file and returns the platform media id.
    fn upload_media(&self, path: &Path) -> Result<String>;

    fn set_media_alt_text(&self, media_id: &str, text: &str) -> Result<()>;

    fn reply_to_mention(&self, id: MentionId, text: &str, media_id: &str) -> Result<()>;
}

pub struct XApiClient {
    api_base: String,
    token: String,
    http: HttpClient,
}

impl XApiClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            api_base: credentials.x_api_base.clone(),
            token: credentials.x_access_token.clone(),
            http: build_client(None)?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .with_context(|| format!("X request failed ({url})"))?;
        response_json_or_error("X", response)
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .with_context(|| format!("X request failed ({url})"))?;
        response_json_or_error("X", response)
    }
}

impl SocialApi for XApiClient {
    fn search_mentions(&self, handle: &str, since: Option<MentionId>) -> Result<Value> {
        let mut query = vec![
            ("query", search_query(handle)),
            ("tweet.fields", SEARCH_TWEET_FIELDS.to_string()),
            ("expansions", SEARCH_EXPANSIONS.to_string()),
            ("media.fields", SEARCH_MEDIA_FIELDS.to_string()),
            ("user.fields", SEARCH_USER_FIELDS.to_string()),
            ("max_results", SEARCH_PAGE_SIZE.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since_id", since.to_string()));
        }
        self.get_json("tweets/search/recent", &query)
    }

    fn get_me(&self) -> Result<User> {
        let payload = self.get_json(
            "users/me",
            &[("user.fields", "username,profile_image_url".to_string())],
        )?;
        parse_user(payload.get("data")).ok_or_else(|| anyhow!("X users/me returned no user"))
    }

    fn resolve_user_avatar(&self, username: &str) -> Result<Option<String>> {
        let username = username.trim().trim_start_matches('@');
        let payload = self.get_json(
            &format!("users/by/username/{username}"),
            &[("user.fields", "profile_image_url".to_string())],
        )?;
        Ok(parse_user(payload.get("data")).and_then(|user| user.profile_image_url))
    }

    fn liked_mention_ids(&self, user_id: &str, limit: usize) -> Result<Vec<MentionId>> {
        let mut ids: Vec<MentionId> = Vec::new();
        let mut pagination_token: Option<String> = None;
        while ids.len() < limit {
            let page_size = (limit - ids.len()).clamp(10, LIKED_PAGE_SIZE);
            let mut query = vec![
                ("max_results", page_size.to_string()),
                ("tweet.fields", "id".to_string()),
            ];
            if let Some(token) = &pagination_token {
                query.push(("pagination_token", token.clone()));
            }
            let page = match self.get_json(&format!("users/{user_id}/liked_tweets"), &query) {
                Ok(page) => page,
                Err(err) if !ids.is_empty() => {
                    warn!(
                        error = %err,
                        collected = ids.len(),
                        "liked page fetch failed; keeping partial set"
                    );
                    break;
                }
                Err(err) => return Err(err),
            };
            let (page_ids, next_token) = parse_liked_page(&page);
            debug!(count = page_ids.len(), "fetched liked page");
            if page_ids.is_empty() {
                break;
            }
            ids.extend(page_ids);
            match next_token {
                Some(token) => pagination_token = Some(token),
                None => break,
            }
        }
        ids.truncate(limit);
        Ok(ids)
    }

    fn like_mention(&self, user_id: &str, id: MentionId) -> Result<()> {
        self.post_json(
            &format!("users/{user_id}/likes"),
            &json!({ "tweet_id": id.to_string() }),
        )?;
        Ok(())
    }

    fn upload_media(&self, path: &Path) -> Result<String> {
        let url = self.endpoint("media/upload");
        let form = MultipartForm::new()
            .text("media_category", "tweet_image")
            .file("media", path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .with_context(|| format!("X media upload failed ({url})"))?;
        let payload = response_json_or_error("X media upload", response)?;
        parse_media_id(&payload).ok_or_else(|| anyhow!("X media upload returned no media id"))
    }

    fn set_media_alt_text(&self, media_id: &str, text: &str) -> Result<()> {
        self.post_json(
            "media/metadata",
            &json!({
                "id": media_id,
                "metadata": { "alt_text": { "text": text } },
            }),
        )?;
        Ok(())
    }

    fn reply_to_mention(&self, id: MentionId, text: &str, media_id: &str) -> Result<()> {
        let payload = self.post_json(
            "tweets",
            &json!({
                "text": text,
                "reply": { "in_reply_to_tweet_id": id.to_string() },
                "media": { "media_ids": [media_id] },
            }),
        )?;
        if payload.pointer("/data/id").is_none() {
            bail!("X reply returned no post id: {payload}");
        }
        Ok(())
    }
}

pub fn search_query(handle: &str) -> String {
    format!("@{} -is:retweet", handle.trim().trim_start_matches('@'))
}

fn parse_user(data: Option<&Value>) -> Option<User> {
    let data = data?;
    let id = match data.get("id")? {
        Value::String(raw) => raw.trim().to_string(),
        Value::Number(raw) => raw.to_string(),
        _ => return None,
    };
    let username = data.get("username").and_then(Value::as_str)?.trim().to_string();
    let profile_image_url = data
        .get("profile_image_url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    Some(User {
        id,
        username,
        profile_image_url,
    })
}

fn parse_liked_page(page: &Value) -> (Vec<MentionId>, Option<String>) {
    let ids = page
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| match row.get("id") {
                    Some(Value::String(raw)) => raw.trim().parse().ok(),
                    Some(Value::Number(raw)) => raw.as_u64().map(MentionId),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let next_token = page
        .pointer("/meta/next_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    (ids, next_token)
}

fn parse_media_id(payload: &Value) -> Option<String> {
    ["/data/id", "/media_id_string", "/id"]
        .iter()
        .find_map(|pointer| match payload.pointer(pointer)? {
            Value::String(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
            Value::Number(raw) => Some(raw.to_string()),
            _ => None,
        })
}
