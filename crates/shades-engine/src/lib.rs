//! Mention pipeline: admission, image-source resolution, generation, reply.

pub mod api;
pub mod config;
pub mod context;
pub mod generator;
pub mod guard;
pub mod http;
pub mod orchestrator;
pub mod poller;
pub mod resolver;
pub mod variation;

pub use api::{SocialApi, XApiClient};
pub use config::{BotConfig, Credentials, LikeMode};
pub use context::{Clock, PipelineContext, SystemClock};
pub use generator::{GeneratedImage, GenerationRequest, ImageGenerator, ReplicateGenerator};
pub use guard::{Admission, SkipReason};
pub use orchestrator::{Delivery, Stage, StageFailure};
pub use poller::{CycleReport, MentionOutcome, Poller};
pub use resolver::{ImageSource, ResolvedImage};
