use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shades_contracts::{
    EventPayload, Journal, MentionId, ProcessedStore, ProfileImageCache, RateLimitCounters,
    RemoteLikedSet,
};
use tracing::warn;

use crate::config::BotConfig;

/// Source of the calendar date used for daily cap resets.
pub trait Clock: Send {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Everything a poll cycle mutates, owned in one place and passed by `&mut`.
pub struct PipelineContext {
    pub config: BotConfig,
    pub processed: ProcessedStore,
    pub liked: RemoteLikedSet,
    pub limits: RateLimitCounters,
    pub avatars: ProfileImageCache,
    pub rng: StdRng,
    /// Numeric id of the authenticated account, once identity has been checked.
    pub bot_user_id: Option<String>,
    clock: Box<dyn Clock>,
    session_id: String,
    journal: Option<Journal>,
}

impl PipelineContext {
    pub fn open(config: BotConfig) -> Result<Self> {
        let processed = ProcessedStore::open(&config.processed_file, config.processed_capacity)
            .with_context(|| {
                format!(
                    "failed to load processed ids from {}",
                    config.processed_file.display()
                )
            })?;
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut seed_bytes = [0u8; 16];
        rng.fill(&mut seed_bytes);
        let session_id = uuid::Builder::from_random_bytes(seed_bytes)
            .into_uuid()
            .to_string();
        let journal = config
            .events_file
            .as_ref()
            .map(|path| Journal::open(path.clone(), session_id.clone()))
            .transpose()?;
        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let today = clock.today();

        Ok(Self {
            config,
            processed,
            liked: RemoteLikedSet::new(),
            limits: RateLimitCounters::new(today),
            avatars: ProfileImageCache::new(),
            rng,
            bot_user_id: None,
            clock,
            session_id,
            journal,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.limits = RateLimitCounters::new(clock.today());
        self.clock = Box::new(clock);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Short per-process token mixed into prompts when uniquifying is enabled.
    pub fn session_token(&self) -> &str {
        self.session_id.get(..8).unwrap_or(&self.session_id)
    }

    pub fn record_processed(&mut self, id: MentionId) -> Result<bool> {
        self.processed
            .record(id)
            .with_context(|| format!("failed to persist processed id {id}"))
    }

    /// Appends a journal row when a journal is configured. Write failures only warn.
    pub fn journal(&self, event_type: &str, payload: EventPayload) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(err) = journal.emit(event_type, payload) {
            warn!(
                path = %journal.path().display(),
                error = %err,
                "journal write failed"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[derive(Debug, Clone, Copy)]
    pub(crate) struct FixedClock(pub NaiveDate);

    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            self.0
        }
    }

    pub(crate) fn test_context(dir: &std::path::Path) -> Result<PipelineContext> {
        let mut config = BotConfig::new("shades");
        config.processed_file = dir.join(".processed_ids");
        config.cursor_file = dir.join(".last_id");
        config.work_dir = dir.to_path_buf();
        config.rng_seed = Some(7);
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).expect("valid date");
        Ok(PipelineContext::open(config)?.with_clock(FixedClock(date)))
    }

    #[test]
    fn seeded_contexts_share_a_session_token() -> Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;
        let a = test_context(first.path())?;
        let b = test_context(second.path())?;
        assert_eq!(a.session_token(), b.session_token());
        assert_eq!(a.session_token().len(), 8);
        Ok(())
    }

    #[test]
    fn record_processed_persists_to_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        assert!(ctx.record_processed(MentionId(5))?);
        assert!(!ctx.record_processed(MentionId(5))?);
        let reopened = ProcessedStore::open(dir.path().join(".processed_ids"), 10)?;
        assert!(reopened.contains(MentionId(5)));
        Ok(())
    }

    #[test]
    fn journal_rows_carry_the_session_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = BotConfig::new("shades");
        config.processed_file = dir.path().join(".processed_ids");
        config.events_file = Some(dir.path().join("events.jsonl"));
        let ctx = PipelineContext::open(config)?;

        let mut payload = EventPayload::new();
        payload.insert("mention_id".to_string(), json!("42"));
        ctx.journal("mention_replied", payload);

        let raw = std::fs::read_to_string(dir.path().join("events.jsonl"))?;
        let row: Value = serde_json::from_str(raw.trim())?;
        assert_eq!(row["type"], "mention_replied");
        assert_eq!(row["session_id"], ctx.session_id());
        assert_eq!(row["mention_id"], "42");
        Ok(())
    }

    #[test]
    fn journal_is_a_no_op_when_unconfigured() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = test_context(dir.path())?;
        ctx.journal("cycle_completed", EventPayload::new());
        assert!(!dir.path().join("events.jsonl").exists());
        Ok(())
    }
}
