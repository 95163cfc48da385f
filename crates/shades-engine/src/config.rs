use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use shades_contracts::limits::DailyCaps;
use shades_contracts::state::processed::DEFAULT_PROCESSED_CAPACITY;

pub const DEFAULT_POLL_SECONDS: u64 = 25;
pub const DEFAULT_POLL_JITTER_SECONDS: u64 = 10;
pub const DEFAULT_MODEL_REF: &str = "google/nano-banana";
pub const DEFAULT_LIKED_PRELOAD_LIMIT: usize = 500;
pub const DEFAULT_LIKE_PROBABILITY: f64 = 0.5;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_ALT_TEXT: &str =
    "The photo from this thread, edited to add sunglasses and a new background.";
pub const DEFAULT_X_API_BASE: &str = "https://api.x.com/2";
pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";

/// Whether a successful reply is followed by a like on the mention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LikeMode {
    Always,
    Probabilistic(f64),
    Never,
}

impl LikeMode {
    fn parse(raw: &str, probability: f64) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always" | "on" => Ok(Self::Always),
            "probabilistic" | "random" => Ok(Self::Probabilistic(probability)),
            "never" | "off" => Ok(Self::Never),
            other => bail!("LIKE_MODE must be always, probabilistic or never (got '{other}')"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Own handle without the `@`.
    pub bot_handle: String,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub model_ref: String,
    pub prompt: String,
    pub accessory_url: Option<String>,
    pub background_url: Option<String>,
    pub skip_if_liked: bool,
    pub liked_preload_limit: usize,
    pub like_mode: LikeMode,
    pub caps: DailyCaps,
    pub reply_delay_min: Duration,
    pub reply_delay_max: Duration,
    /// Alt text attached to uploads; `None` leaves uploads undescribed.
    pub alt_text: Option<String>,
    pub image_variation: bool,
    pub prompt_uniquifier: bool,
    pub processed_file: PathBuf,
    pub processed_capacity: usize,
    pub cursor_file: PathBuf,
    pub events_file: Option<PathBuf>,
    /// Where generated images are staged before upload.
    pub work_dir: PathBuf,
    pub rng_seed: Option<u64>,
    pub health_port: u16,
}

impl BotConfig {
    pub fn new(bot_handle: &str) -> Self {
        Self {
            bot_handle: normalize_handle(bot_handle),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECONDS),
            poll_jitter: Duration::from_secs(DEFAULT_POLL_JITTER_SECONDS),
            model_ref: DEFAULT_MODEL_REF.to_string(),
            prompt: String::new(),
            accessory_url: None,
            background_url: None,
            skip_if_liked: true,
            liked_preload_limit: DEFAULT_LIKED_PRELOAD_LIMIT,
            like_mode: LikeMode::Always,
            caps: DailyCaps::default(),
            reply_delay_min: Duration::ZERO,
            reply_delay_max: Duration::ZERO,
            alt_text: None,
            image_variation: false,
            prompt_uniquifier: false,
            processed_file: PathBuf::from(".processed_ids"),
            processed_capacity: DEFAULT_PROCESSED_CAPACITY,
            cursor_file: PathBuf::from(".last_id"),
            events_file: None,
            work_dir: std::env::temp_dir(),
            rng_seed: None,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(lookup);
        let Some(handle) = env.get("BOT_HANDLE").map(|raw| normalize_handle(&raw)) else {
            bail!("BOT_HANDLE is required (without the @)");
        };
        if handle.is_empty() {
            bail!("BOT_HANDLE is required (without the @)");
        }
        let mut config = Self::new(&handle);

        config.poll_interval =
            Duration::from_secs(env.parse_or("POLL_SECONDS", DEFAULT_POLL_SECONDS)?);
        config.poll_jitter =
            Duration::from_secs(env.parse_or("POLL_JITTER_SECONDS", DEFAULT_POLL_JITTER_SECONDS)?);
        if let Some(model_ref) = env.get("MODEL_REF") {
            config.model_ref = model_ref;
        }
        if let Some(prompt) = env.get("NANO_PROMPT") {
            config.prompt = prompt;
        }
        config.accessory_url = env.get("SUNGLASSES_URL");
        config.background_url = env.get("BACKGROUND_URL");

        config.skip_if_liked = env.flag("SKIP_IF_LIKED", true)?;
        config.liked_preload_limit =
            env.parse_or("LIKED_PRELOAD_LIMIT", DEFAULT_LIKED_PRELOAD_LIMIT)?;

        let probability: f64 = env.parse_or("LIKE_PROBABILITY", DEFAULT_LIKE_PROBABILITY)?;
        if !(0.0..=1.0).contains(&probability) {
            bail!("LIKE_PROBABILITY must be within 0..=1 (got {probability})");
        }
        config.like_mode = match env.get("LIKE_MODE") {
            Some(raw) => LikeMode::parse(&raw, probability)?,
            None => LikeMode::Always,
        };

        config.caps = DailyCaps {
            per_user: cap(env.parse_or("MAX_REPLIES_PER_USER_PER_DAY", 0u32)?),
            global: cap(env.parse_or("MAX_REPLIES_PER_DAY", 0u32)?),
        };

        config.reply_delay_min = env.seconds("REPLY_DELAY_MIN_SECONDS")?;
        config.reply_delay_max = env.seconds("REPLY_DELAY_MAX_SECONDS")?;
        if config.reply_delay_min > config.reply_delay_max {
            bail!("REPLY_DELAY_MIN_SECONDS must not exceed REPLY_DELAY_MAX_SECONDS");
        }

        if env.flag("ALT_TEXT_ENABLED", false)? {
            let text = env.get("ALT_TEXT").unwrap_or_else(|| DEFAULT_ALT_TEXT.to_string());
            config.alt_text = Some(text);
        }
        config.image_variation = env.flag("IMAGE_VARIATION_ENABLED", false)?;
        config.prompt_uniquifier = env.flag("PROMPT_UNIQUIFIER_ENABLED", false)?;

        if let Some(path) = env.get("PROCESSED_FILE") {
            config.processed_file = PathBuf::from(path);
        }
        config.processed_capacity = env
            .parse_or("PROCESSED_CAPACITY", DEFAULT_PROCESSED_CAPACITY)?
            .max(1);
        if let Some(path) = env.get("LAST_ID_FILE") {
            config.cursor_file = PathBuf::from(path);
        }
        config.events_file = env.get("EVENTS_FILE").map(PathBuf::from);
        if let Some(path) = env.get("SHADES_WORK_DIR") {
            config.work_dir = PathBuf::from(path);
        }
        config.rng_seed = env
            .get("RNG_SEED")
            .map(|raw| raw.parse())
            .transpose()
            .context("RNG_SEED must be an unsigned integer")?;
        config.health_port = match env.first(&["HEALTH_PORT", "PORT"]) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid health port '{raw}'"))?,
            None => DEFAULT_HEALTH_PORT,
        };

        Ok(config)
    }

    /// Case-insensitive comparison against the bot's own handle.
    pub fn is_own_handle(&self, username: &str) -> bool {
        normalize_handle(username).eq_ignore_ascii_case(&self.bot_handle)
    }
}

/// API credentials and endpoints. Missing tokens stop the process at startup.
#[derive(Clone)]
pub struct Credentials {
    pub x_access_token: String,
    pub x_api_base: String,
    pub replicate_api_token: String,
    pub replicate_api_base: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(lookup);
        let Some(x_access_token) = env.first(&["X_USER_ACCESS_TOKEN", "X_ACCESS_TOKEN"]) else {
            bail!("X_USER_ACCESS_TOKEN not set");
        };
        let Some(replicate_api_token) = env.first(&["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"])
        else {
            bail!("REPLICATE_API_TOKEN not set");
        };
        Ok(Self {
            x_access_token,
            x_api_base: env
                .get("X_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_X_API_BASE.to_string()),
            replicate_api_token,
            replicate_api_base: env
                .get("REPLICATE_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_REPLICATE_API_BASE.to_string()),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("x_api_base", &self.x_api_base)
            .field("replicate_api_base", &self.replicate_api_base)
            .finish_non_exhaustive()
    }
}

struct EnvLookup<F>(F);

impl<F> EnvLookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("{key} has an invalid value '{raw}'")),
            None => Ok(default),
        }
    }

    /// Fractional seconds, zero when unset.
    fn seconds(&self, key: &str) -> Result<Duration> {
        let raw: f64 = self.parse_or(key, 0.0)?;
        Duration::try_from_secs_f64(raw)
            .with_context(|| format!("{key} must be a non-negative number of seconds"))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("{key} must be 1 or 0 (got '{raw}')"),
        }
    }
}

fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_string()
}

fn cap(raw: u32) -> Option<u32> {
    (raw > 0).then_some(raw)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn handle_is_required() {
        let err = BotConfig::from_lookup(lookup(&[])).err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("BOT_HANDLE is required (without the @)"));
        assert!(BotConfig::from_lookup(lookup(&[("BOT_HANDLE", " @ ")])).is_err());
    }

    #[test]
    fn defaults_follow_documented_values() -> Result<()> {
        let config = BotConfig::from_lookup(lookup(&[("BOT_HANDLE", "@Shades")]))?;
        assert_eq!(config.bot_handle, "Shades");
        assert_eq!(config.poll_interval, Duration::from_secs(25));
        assert_eq!(config.model_ref, "google/nano-banana");
        assert!(config.skip_if_liked);
        assert_eq!(config.liked_preload_limit, 500);
        assert_eq!(config.like_mode, LikeMode::Always);
        assert!(config.caps.is_unbounded());
        assert_eq!(config.alt_text, None);
        assert_eq!(config.processed_capacity, DEFAULT_PROCESSED_CAPACITY);
        assert_eq!(config.cursor_file, PathBuf::from(".last_id"));
        assert_eq!(config.health_port, 8080);
        Ok(())
    }

    #[test]
    fn overrides_are_parsed() -> Result<()> {
        let config = BotConfig::from_lookup(lookup(&[
            ("BOT_HANDLE", "shades"),
            ("POLL_SECONDS", "60"),
            ("SKIP_IF_LIKED", "0"),
            ("LIKE_MODE", "probabilistic"),
            ("LIKE_PROBABILITY", "0.25"),
            ("MAX_REPLIES_PER_USER_PER_DAY", "3"),
            ("MAX_REPLIES_PER_DAY", "0"),
            ("REPLY_DELAY_MIN_SECONDS", "2"),
            ("REPLY_DELAY_MAX_SECONDS", "7.5"),
            ("ALT_TEXT_ENABLED", "1"),
            ("IMAGE_VARIATION_ENABLED", "true"),
            ("PROCESSED_CAPACITY", "0"),
            ("PORT", "9000"),
            ("RNG_SEED", "42"),
        ]))?;
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert!(!config.skip_if_liked);
        assert_eq!(config.like_mode, LikeMode::Probabilistic(0.25));
        assert_eq!(config.caps.per_user, Some(3));
        assert_eq!(config.caps.global, None);
        assert_eq!(config.reply_delay_max, Duration::from_millis(7500));
        assert_eq!(config.alt_text.as_deref(), Some(DEFAULT_ALT_TEXT));
        assert!(config.image_variation);
        assert_eq!(config.processed_capacity, 1);
        assert_eq!(config.health_port, 9000);
        assert_eq!(config.rng_seed, Some(42));
        Ok(())
    }

    #[test]
    fn malformed_values_are_fatal() {
        for (key, value) in [
            ("POLL_SECONDS", "soon"),
            ("SKIP_IF_LIKED", "maybe"),
            ("LIKE_MODE", "sometimes"),
            ("LIKE_PROBABILITY", "1.5"),
            ("REPLY_DELAY_MIN_SECONDS", "9"),
            ("REPLY_DELAY_MAX_SECONDS", "-1"),
        ] {
            let result = BotConfig::from_lookup(lookup(&[("BOT_HANDLE", "shades"), (key, value)]));
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn own_handle_matches_case_insensitively() {
        let config = BotConfig::new("Shades");
        assert!(config.is_own_handle("@shades"));
        assert!(config.is_own_handle("SHADES"));
        assert!(!config.is_own_handle("shadesfan"));
    }

    #[test]
    fn credentials_require_both_tokens() -> Result<()> {
        assert!(Credentials::from_lookup(lookup(&[("X_ACCESS_TOKEN", "x")])).is_err());
        assert!(Credentials::from_lookup(lookup(&[("REPLICATE_API_TOKEN", "r")])).is_err());
        let creds = Credentials::from_lookup(lookup(&[
            ("X_ACCESS_TOKEN", "x"),
            ("REPLICATE_API_TOKEN", "r"),
            ("X_API_BASE", "http://127.0.0.1:9/2/"),
        ]))?;
        assert_eq!(creds.x_api_base, "http://127.0.0.1:9/2");
        assert_eq!(creds.replicate_api_base, DEFAULT_REPLICATE_API_BASE);
        Ok(())
    }
}
