use std::fmt;
use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use rand::seq::SliceRandom;
use rand::Rng;
use shades_contracts::Mention;
use tracing::{debug, info, warn};

use crate::api::SocialApi;
use crate::config::LikeMode;
use crate::context::PipelineContext;
use crate::generator::{GenerationRequest, ImageGenerator};
use crate::resolver::ResolvedImage;
use crate::variation::perturb_image;

const REPLY_SUFFIXES: &[&str] = &["", " 😎", " 🕶️", " ✨", " 🔥"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Generate,
    Download,
    Stage,
    Upload,
    Reply,
    Commit,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Generate => "generate",
            Self::Download => "download",
            Self::Stage => "stage",
            Self::Upload => "upload",
            Self::Reply => "reply",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline step that failed after the mention was admitted.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: anyhow::Error,
}

impl StageFailure {
    fn new(stage: Stage, error: anyhow::Error) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {:#}", self.stage, self.error)
    }
}

impl std::error::Error for StageFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub media_id: String,
    pub reply_text: String,
    pub liked: bool,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for anyhow::Result<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure::new(stage, error))
    }
}

/// Generates, uploads and replies for one admitted mention, then commits state.
///
/// The staged image file lives in the configured work dir and is removed when
/// this function returns, whatever the outcome. Nothing is committed unless
/// the reply was posted; once it is, the counters and the like always run and
/// a processed-file write failure only warns.
pub fn deliver_reply(
    ctx: &mut PipelineContext,
    api: &dyn SocialApi,
    generator: &dyn ImageGenerator,
    mention: &Mention,
    author_username: &str,
    person: &ResolvedImage,
) -> Result<Delivery, StageFailure> {
    let request = build_request(ctx, person).at(Stage::Prepare)?;
    let delay = reply_delay(
        ctx.config.reply_delay_min,
        ctx.config.reply_delay_max,
        &mut ctx.rng,
    );
    if !delay.is_zero() {
        debug!(delay_ms = delay.as_millis() as u64, "waiting before reply");
        thread::sleep(delay);
    }

    info!(
        mention_id = %mention.id,
        source = %person.source,
        person_url = %person.url,
        "generating image"
    );
    let generated = generator.generate(&request).at(Stage::Generate)?;
    let mut bytes = generator.materialize(generated).at(Stage::Download)?;

    if ctx.config.image_variation {
        match perturb_image(&bytes, &mut ctx.rng) {
            Ok(varied) => bytes = varied,
            Err(err) => warn!(
                mention_id = %mention.id,
                error = %err,
                "image variation failed; sending unvaried image"
            ),
        }
    }

    let staged = stage_image(ctx, &bytes).at(Stage::Stage)?;
    let media_id = api.upload_media(staged.path()).at(Stage::Upload)?;
    debug!(mention_id = %mention.id, %media_id, "uploaded image");

    if let Some(alt_text) = &ctx.config.alt_text {
        if let Err(err) = api.set_media_alt_text(&media_id, alt_text) {
            warn!(%media_id, error = %err, "alt text rejected; replying without it");
        }
    }

    let reply_text = reply_text(ctx, author_username);
    api.reply_to_mention(mention.id, &reply_text, &media_id)
        .at(Stage::Reply)?;
    drop(staged);
    info!(mention_id = %mention.id, author = author_username, "replied");

    if let Err(err) = ctx.record_processed(mention.id) {
        warn!(
            mention_id = %mention.id,
            error = %format!("{err:#}"),
            "processed id kept in memory only"
        );
    }
    let today = ctx.today();
    ctx.limits.increment(author_username, today);
    let liked = like_after_reply(ctx, api, mention);

    Ok(Delivery {
        media_id,
        reply_text,
        liked,
    })
}

fn build_request(
    ctx: &PipelineContext,
    person: &ResolvedImage,
) -> anyhow::Result<GenerationRequest> {
    let accessory_url = ctx
        .config
        .accessory_url
        .clone()
        .ok_or_else(|| anyhow!("SUNGLASSES_URL is not configured"))?;
    let background_url = ctx
        .config
        .background_url
        .clone()
        .ok_or_else(|| anyhow!("BACKGROUND_URL is not configured"))?;
    let prompt = if ctx.config.prompt_uniquifier {
        format!("{} (ref {})", ctx.config.prompt.trim(), ctx.session_token())
            .trim()
            .to_string()
    } else {
        ctx.config.prompt.clone()
    };
    Ok(GenerationRequest {
        person_url: person.url.clone(),
        accessory_url,
        background_url,
        prompt,
    })
}

/// Uniform in `min..=max`; `max` when the range is empty, zero when `max` is.
fn reply_delay<R: Rng>(min: Duration, max: Duration, rng: &mut R) -> Duration {
    if max.is_zero() {
        Duration::ZERO
    } else if max > min {
        Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..=max.as_secs_f64()))
    } else {
        max
    }
}

fn stage_image(ctx: &PipelineContext, bytes: &[u8]) -> anyhow::Result<tempfile::NamedTempFile> {
    let work_dir = &ctx.config.work_dir;
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("failed to create {}", work_dir.display()))?;
    let mut staged = tempfile::Builder::new()
        .prefix("shades-")
        .suffix(".png")
        .tempfile_in(work_dir)
        .with_context(|| format!("failed to create image file in {}", work_dir.display()))?;
    staged
        .as_file_mut()
        .write_all(bytes)
        .context("failed to write staged image")?;
    staged.as_file_mut().flush().context("failed to flush staged image")?;
    Ok(staged)
}

fn reply_text(ctx: &mut PipelineContext, author_username: &str) -> String {
    let suffix = REPLY_SUFFIXES.choose(&mut ctx.rng).copied().unwrap_or_default();
    format!("@{}{}", author_username.trim_start_matches('@'), suffix)
}

/// Likes the mention per the configured mode. Failures only warn.
fn like_after_reply(ctx: &mut PipelineContext, api: &dyn SocialApi, mention: &Mention) -> bool {
    if !wants_like(ctx.config.like_mode, &mut ctx.rng) {
        return false;
    }
    let Some(user_id) = ctx.bot_user_id.clone() else {
        warn!(mention_id = %mention.id, "own user id unknown; not liking");
        return false;
    };
    match api.like_mention(&user_id, mention.id) {
        Ok(()) => {
            ctx.liked.insert(mention.id);
            debug!(mention_id = %mention.id, "liked mention");
            true
        }
        Err(err) => {
            warn!(mention_id = %mention.id, error = %err, "like failed");
            false
        }
    }
}

fn wants_like<R: Rng>(mode: LikeMode, rng: &mut R) -> bool {
    match mode {
        LikeMode::Always => true,
        LikeMode::Probabilistic(probability) => rng.gen_bool(probability.clamp(0.0, 1.0)),
        LikeMode::Never => false,
    }
}
