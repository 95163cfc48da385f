use std::fmt;

use anyhow::Result;
use shades_contracts::{CapHit, Mention};
use tracing::info;

use crate::context::PipelineContext;

/// Permanent per-mention conditions. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SelfAuthored,
    AlreadyProcessed,
    AlreadyLiked,
    RateLimited(CapHit),
    NoImageSource,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SelfAuthored => "self_authored",
            Self::AlreadyProcessed => "already_processed",
            Self::AlreadyLiked => "already_liked",
            Self::RateLimited(CapHit::Global { .. }) => "global_cap",
            Self::RateLimited(CapHit::PerUser { .. }) => "user_cap",
            Self::NoImageSource => "no_image_source",
        }
    }

    /// Everything except a local dedup hit is written to the processed set.
    pub fn records_processed(&self) -> bool {
        !matches!(self, Self::AlreadyProcessed)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited(CapHit::Global { count, cap }) => {
                write!(f, "global daily cap reached ({count}/{cap})")
            }
            Self::RateLimited(CapHit::PerUser {
                username,
                count,
                cap,
            }) => write!(f, "daily cap for @{username} reached ({count}/{cap})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Eligible,
    Skip(SkipReason),
}

/// Runs the four gates in order: self-authorship, local dedup, remote-like
/// dedup, daily caps. A failing gate records the skip before returning.
pub fn admit(
    ctx: &mut PipelineContext,
    mention: &Mention,
    author_username: Option<&str>,
) -> Result<Admission> {
    let reason = if is_self_authored(ctx, mention, author_username) {
        Some(SkipReason::SelfAuthored)
    } else if ctx.processed.contains(mention.id) {
        Some(SkipReason::AlreadyProcessed)
    } else if ctx.config.skip_if_liked && ctx.liked.contains(mention.id) {
        Some(SkipReason::AlreadyLiked)
    } else {
        let today = ctx.today();
        let counter_key = author_username.unwrap_or(&mention.author_id);
        ctx.limits
            .check(counter_key, &ctx.config.caps, today)
            .map(SkipReason::RateLimited)
    };

    match reason {
        Some(reason) => {
            record_skip(ctx, mention, &reason)?;
            Ok(Admission::Skip(reason))
        }
        None => Ok(Admission::Eligible),
    }
}

/// Persists a skip when the reason calls for it.
pub fn record_skip(
    ctx: &mut PipelineContext,
    mention: &Mention,
    reason: &SkipReason,
) -> Result<()> {
    info!(mention_id = %mention.id, reason = %reason, "skipping mention");
    if reason.records_processed() {
        ctx.record_processed(mention.id)?;
    }
    Ok(())
}

fn is_self_authored(
    ctx: &PipelineContext,
    mention: &Mention,
    author_username: Option<&str>,
) -> bool {
    if ctx.bot_user_id.as_deref() == Some(mention.author_id.as_str()) {
        return true;
    }
    author_username.is_some_and(|username| ctx.config.is_own_handle(username))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use shades_contracts::MentionId;

    use super::*;
    use crate::context::tests::{test_context, FixedClock};

    fn mention(id: u64) -> Mention {
        Mention::new(MentionId(id), "1")
    }

    #[test]
    fn self_authored_mentions_are_recorded() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        let admission = admit(&mut ctx, &mention(101), Some("Shades"))?;
        assert_eq!(admission, Admission::Skip(SkipReason::SelfAuthored));
        assert!(ctx.processed.contains(MentionId(101)));
        assert_eq!(ctx.limits.global_count(), 0);
        Ok(())
    }

    #[test]
    fn bot_user_id_also_marks_self_authorship() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.bot_user_id = Some("1".to_string());
        let admission = admit(&mut ctx, &mention(5), Some("renamed"))?;
        assert_eq!(admission, Admission::Skip(SkipReason::SelfAuthored));
        Ok(())
    }

    #[test]
    fn processed_mentions_skip_without_writing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.record_processed(MentionId(7))?;
        let before = std::fs::read_to_string(dir.path().join(".processed_ids"))?;
        let admission = admit(&mut ctx, &mention(7), Some("alice"))?;
        assert_eq!(admission, Admission::Skip(SkipReason::AlreadyProcessed));
        let after = std::fs::read_to_string(dir.path().join(".processed_ids"))?;
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn liked_mentions_migrate_into_processed_set() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.liked.insert(MentionId(8));
        let admission = admit(&mut ctx, &mention(8), Some("alice"))?;
        assert_eq!(admission, Admission::Skip(SkipReason::AlreadyLiked));
        assert!(ctx.processed.contains(MentionId(8)));
        Ok(())
    }

    #[test]
    fn liked_gate_is_off_when_disabled() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.config.skip_if_liked = false;
        ctx.liked.insert(MentionId(8));
        assert_eq!(admit(&mut ctx, &mention(8), Some("alice"))?, Admission::Eligible);
        assert!(!ctx.processed.contains(MentionId(8)));
        Ok(())
    }

    #[test]
    fn per_user_cap_skips_and_records() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.config.caps.per_user = Some(1);
        let today = ctx.today();
        ctx.limits.increment("alice", today);

        let admission = admit(&mut ctx, &mention(9), Some("alice"))?;
        assert_eq!(
            admission,
            Admission::Skip(SkipReason::RateLimited(CapHit::PerUser {
                username: "alice".to_string(),
                count: 1,
                cap: 1,
            }))
        );
        assert!(ctx.processed.contains(MentionId(9)));
        assert_eq!(admit(&mut ctx, &mention(10), Some("bob"))?, Admission::Eligible);
        Ok(())
    }

    #[test]
    fn caps_lift_on_the_next_day() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.config.caps.global = Some(1);
        let today = ctx.today();
        ctx.limits.increment("alice", today);
        assert!(matches!(
            admit(&mut ctx, &mention(11), Some("bob"))?,
            Admission::Skip(SkipReason::RateLimited(CapHit::Global { .. }))
        ));

        let tomorrow = NaiveDate::from_ymd_opt(2025, 9, 2).expect("valid date");
        let counters = ctx.limits.clone();
        let mut ctx = ctx.with_clock(FixedClock(tomorrow));
        ctx.limits = counters;
        assert_eq!(admit(&mut ctx, &mention(12), Some("bob"))?, Admission::Eligible);
        assert_eq!(ctx.limits.reset_date(), tomorrow);
        Ok(())
    }

    #[test]
    fn self_authorship_is_checked_before_dedup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ctx = test_context(dir.path())?;
        ctx.liked.insert(MentionId(13));
        let admission = admit(&mut ctx, &mention(13), Some("shades"))?;
        assert_eq!(admission, Admission::Skip(SkipReason::SelfAuthored));
        Ok(())
    }
}
