pub mod avatars;
pub mod events;
pub mod limits;
pub mod mentions;
pub mod normalize;
pub mod state;

pub use avatars::ProfileImageCache;
pub use events::{EventPayload, Journal};
pub use limits::{CapHit, DailyCaps, RateLimitCounters};
pub use mentions::{MediaItem, MediaKind, Mention, MentionId, User};
pub use normalize::{normalize_batch, LookupTables, NormalizedBatch};
pub use state::{CursorStore, ProcessedStore, RemoteLikedSet};
