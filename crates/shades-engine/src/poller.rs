use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde_json::{json, Value};
use shades_contracts::{
    normalize_batch, CursorStore, EventPayload, LookupTables, Mention, MentionId,
};
use tracing::{error, info, warn};

use crate::api::SocialApi;
use crate::context::PipelineContext;
use crate::generator::ImageGenerator;
use crate::guard::{admit, record_skip, Admission, SkipReason};
use crate::http::error_chain_text;
use crate::orchestrator::{deliver_reply, Delivery, Stage, StageFailure};
use crate::resolver::{resolve_person_image, ImageSource};

#[derive(Debug)]
pub enum MentionOutcome {
    Replied {
        source: ImageSource,
        delivery: Delivery,
    },
    Skipped(SkipReason),
    Abandoned(StageFailure),
}

impl MentionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied { .. } => "replied",
            Self::Skipped(_) => "skipped",
            Self::Abandoned(_) => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub replied: usize,
    pub skipped: usize,
    pub abandoned: usize,
    pub cursor: Option<MentionId>,
}

/// Owns the cursor and drives fetch, dispatch and cursor advance.
pub struct Poller<A, G> {
    api: A,
    generator: G,
    cursor: CursorStore,
}

impl<A: SocialApi, G: ImageGenerator> Poller<A, G> {
    pub fn new(api: A, generator: G, cursor: CursorStore) -> Self {
        Self {
            api,
            generator,
            cursor,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn cursor(&self) -> Option<MentionId> {
        self.cursor.current()
    }

    /// Startup identity check and liked-set preload. Neither failure is fatal.
    pub fn prepare(&self, ctx: &mut PipelineContext) {
        match self.api.get_me() {
            Ok(me) => {
                info!(username = %me.username, user_id = %me.id, "authenticated");
                if !ctx.config.is_own_handle(&me.username) {
                    warn!(
                        authenticated = %me.username,
                        configured = %ctx.config.bot_handle,
                        "authenticated username does not match BOT_HANDLE"
                    );
                }
                ctx.bot_user_id = Some(me.id);
            }
            Err(err) => warn!(error = %err, "could not determine own user id"),
        }

        if !ctx.config.skip_if_liked {
            return;
        }
        let Some(user_id) = ctx.bot_user_id.clone() else {
            return;
        };
        match self
            .api
            .liked_mention_ids(&user_id, ctx.config.liked_preload_limit)
        {
            Ok(ids) => {
                ctx.liked.replace(ids);
                info!(count = ctx.liked.len(), "preloaded liked ids");
            }
            Err(err) => warn!(error = %err, "liked preload failed"),
        }
    }

    /// One fetch-dispatch-advance pass. An error means the fetch or the
    /// cursor write failed; per-mention failures are counted, not raised.
    pub fn run_cycle(&mut self, ctx: &mut PipelineContext) -> Result<CycleReport> {
        let since = self.cursor.current();
        let response = self
            .api
            .search_mentions(&ctx.config.bot_handle, since)
            .context("mention search failed")?;
        let batch = normalize_batch(&response, &mut ctx.avatars);

        let mut mentions = batch.mentions;
        mentions.sort_by_key(|mention| mention.id);
        mentions.dedup_by_key(|mention| mention.id);

        let mut report = CycleReport {
            fetched: mentions.len(),
            ..CycleReport::default()
        };
        for mention in &mentions {
            let outcome = self.dispatch(ctx, mention, &batch.tables);
            record_outcome(ctx, mention, &batch.tables, &outcome);
            match outcome {
                MentionOutcome::Replied { .. } => report.replied += 1,
                MentionOutcome::Skipped(_) => report.skipped += 1,
                MentionOutcome::Abandoned(_) => report.abandoned += 1,
            }
        }

        if let Some(last) = mentions.last() {
            self.cursor
                .advance(last.id)
                .with_context(|| format!("failed to persist cursor {}", last.id))?;
        }
        report.cursor = self.cursor.current();

        let mut payload = EventPayload::new();
        payload.insert("fetched".to_string(), json!(report.fetched));
        payload.insert("replied".to_string(), json!(report.replied));
        payload.insert("skipped".to_string(), json!(report.skipped));
        payload.insert("abandoned".to_string(), json!(report.abandoned));
        payload.insert(
            "cursor".to_string(),
            report
                .cursor
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(Value::Null),
        );
        ctx.journal("cycle_completed", payload);
        Ok(report)
    }

    fn dispatch(
        &self,
        ctx: &mut PipelineContext,
        mention: &Mention,
        tables: &LookupTables,
    ) -> MentionOutcome {
        let author = tables.username(&mention.author_id);
        match admit(ctx, mention, author) {
            Ok(Admission::Eligible) => {}
            Ok(Admission::Skip(reason)) => return MentionOutcome::Skipped(reason),
            Err(error) => {
                return MentionOutcome::Abandoned(StageFailure {
                    stage: Stage::Commit,
                    error,
                });
            }
        }

        let resolved = resolve_person_image(
            &mut ctx.avatars,
            &self.api,
            &ctx.config.bot_handle,
            mention,
            tables,
        );
        let Some(person) = resolved else {
            let reason = SkipReason::NoImageSource;
            info!(
                mention_id = %mention.id,
                attachments = mention.has_attachments(),
                "no usable person image"
            );
            if let Err(error) = record_skip(ctx, mention, &reason) {
                return MentionOutcome::Abandoned(StageFailure {
                    stage: Stage::Commit,
                    error,
                });
            }
            return MentionOutcome::Skipped(reason);
        };
        info!(mention_id = %mention.id, source = %person.source, "resolved person image");

        let Some(author) = author else {
            return MentionOutcome::Abandoned(StageFailure {
                stage: Stage::Prepare,
                error: anyhow!("author {} missing from response includes", mention.author_id),
            });
        };
        match deliver_reply(ctx, &self.api, &self.generator, mention, author, &person) {
            Ok(delivery) => MentionOutcome::Replied {
                source: person.source,
                delivery,
            },
            Err(failure) => MentionOutcome::Abandoned(failure),
        }
    }

    /// Base interval plus uniform jitter in `0..=poll_jitter`.
    pub fn next_delay(ctx: &mut PipelineContext) -> Duration {
        let jitter_ms = ctx.config.poll_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            ctx.rng.gen_range(0..=jitter_ms)
        };
        ctx.config.poll_interval + Duration::from_millis(jitter)
    }

    /// Polls until the process is stopped. A failed cycle is logged and the
    /// next one re-fetches from the unchanged cursor.
    pub fn run_forever(&mut self, ctx: &mut PipelineContext) -> ! {
        info!(cursor = ?self.cursor.current().map(MentionId::get), "poller started");
        loop {
            match self.run_cycle(ctx) {
                Ok(report) => info!(
                    fetched = report.fetched,
                    replied = report.replied,
                    skipped = report.skipped,
                    abandoned = report.abandoned,
                    cursor = ?report.cursor.map(MentionId::get),
                    "cycle complete"
                ),
                Err(err) => error!(error = %error_chain_text(&err, 512), "cycle failed"),
            }
            let delay = Self::next_delay(ctx);
            thread::sleep(delay);
        }
    }
}

fn record_outcome(
    ctx: &PipelineContext,
    mention: &Mention,
    tables: &LookupTables,
    outcome: &MentionOutcome,
) {
    let author = tables.username(&mention.author_id).unwrap_or("");
    let mut payload = EventPayload::new();
    payload.insert("mention_id".to_string(), json!(mention.id.to_string()));
    payload.insert("author".to_string(), json!(author));
    match outcome {
        MentionOutcome::Replied { source, delivery } => {
            payload.insert("source".to_string(), json!(source.to_string()));
            payload.insert("media_id".to_string(), json!(delivery.media_id));
            payload.insert("liked".to_string(), json!(delivery.liked));
        }
        MentionOutcome::Skipped(reason) => {
            payload.insert("reason".to_string(), json!(reason.label()));
        }
        MentionOutcome::Abandoned(failure) => {
            let error = error_chain_text(&failure.error, 512);
            warn!(
                mention_id = %mention.id,
                author,
                stage = %failure.stage,
                error = %error,
                "abandoned mention"
            );
            payload.insert("stage".to_string(), json!(failure.stage.as_str()));
            payload.insert("error".to_string(), json!(error));
        }
    }
    ctx.journal(&format!("mention_{}", outcome.label()), payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;

    #[test]
    fn next_delay_stays_within_jitter_bound() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.config.poll_interval = Duration::from_secs(25);
        ctx.config.poll_jitter = Duration::from_secs(10);
        for _ in 0..50 {
            let delay = Poller::<NoApi, NoGenerator>::next_delay(&mut ctx);
            assert!(delay >= Duration::from_secs(25));
            assert!(delay <= Duration::from_secs(35));
        }
        ctx.config.poll_jitter = Duration::ZERO;
        assert_eq!(
            Poller::<NoApi, NoGenerator>::next_delay(&mut ctx),
            Duration::from_secs(25)
        );
        Ok(())
    }

    #[test]
    fn outcome_labels_name_the_journal_event() {
        let outcome = MentionOutcome::Skipped(SkipReason::SelfAuthored);
        assert_eq!(outcome.label(), "skipped");
        let outcome = MentionOutcome::Abandoned(StageFailure {
            stage: Stage::Upload,
            error: anyhow!("boom"),
        });
        assert_eq!(outcome.label(), "abandoned");
    }

    struct NoApi;
    struct NoGenerator;

    impl SocialApi for NoApi {
        fn search_mentions(&self, _: &str, _: Option<MentionId>) -> Result<Value> {
            anyhow::bail!("offline")
        }
        fn get_me(&self) -> Result<shades_contracts::User> {
            anyhow::bail!("offline")
        }
        fn resolve_user_avatar(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn liked_mention_ids(&self, _: &str, _: usize) -> Result<Vec<MentionId>> {
            Ok(Vec::new())
        }
        fn like_mention(&self, _: &str, _: MentionId) -> Result<()> {
            Ok(())
        }
        fn upload_media(&self, _: &std::path::Path) -> Result<String> {
            anyhow::bail!("offline")
        }
        fn set_media_alt_text(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        fn reply_to_mention(&self, _: MentionId, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("offline")
        }
    }

    impl ImageGenerator for NoGenerator {
        fn generate(
            &self,
            _: &crate::generator::GenerationRequest,
        ) -> Result<crate::generator::GeneratedImage> {
            anyhow::bail!("offline")
        }
        fn download(&self, _: &str) -> Result<Vec<u8>> {
            anyhow::bail!("offline")
        }
    }

    #[test]
    fn failed_search_leaves_cursor_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(".last_id"), "40\n")?;
        let mut ctx = test_context(dir.path())?;
        let cursor = CursorStore::open(dir.path().join(".last_id"))?;
        let mut poller = Poller::new(NoApi, NoGenerator, cursor);

        assert!(poller.run_cycle(&mut ctx).is_err());
        assert_eq!(poller.cursor(), Some(MentionId(40)));
        Ok(())
    }

    #[test]
    fn prepare_tolerates_identity_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        let cursor = CursorStore::open(dir.path().join(".last_id"))?;
        let poller = Poller::new(NoApi, NoGenerator, cursor);
        poller.prepare(&mut ctx);
        assert_eq!(ctx.bot_user_id, None);
        assert!(ctx.liked.is_empty());
        Ok(())
    }
}
