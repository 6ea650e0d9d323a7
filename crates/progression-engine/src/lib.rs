//! Progression Engine
//!
//! Community-driven unlock progression: engagement from feature modules is
//! scored and accumulated toward a target node, the community votes on
//! which node to target next, and feature modules consult the gate before
//! acting.
//!
//! # Lifecycle
//!
//! 1. With no target, a voting session opens over (at most four) eligible nodes
//! 2. Closing the session targets the winner at its next level
//! 3. Engagement accumulates until the target's cost is reached
//! 4. The unlock commits exactly once, a fresh counter starts at zero, and
//!    the next vote opens
//!
//! Points earned while a vote runs are banked and count toward its winner.
//!
//! # Concurrency
//!
//! All state lives behind one `RwLock` inside [`Engine`]. Every mutation is a
//! single check-and-commit unit under the write lock, persisted through the
//! [`Store`] before the in-memory state changes. A failed write changes
//! nothing and can be retried. Reads (gate checks, tree, estimates) take the
//! read lock and always see the latest commit.

mod accumulator;
mod admin;
mod clock;
mod config;
mod engine;
mod error;
mod estimator;
mod events;
mod gate;
mod identity;
mod model;
mod state;
mod status;
mod store;
mod velocity;
mod voting;

pub use accumulator::{
    score, ContributionBreakdown, EngagementOutcome, LeaderboardEntry, MetricTotals,
    DEFAULT_LEADERBOARD_LIMIT, MAX_ENGAGEMENT_VALUE, MAX_LEADERBOARD_LIMIT,
};
pub use clock::{Clock, ManualClock, SystemClock, DAY_MS, HOUR_MS};
pub use config::{EngineConfig, RetargetPolicy};
pub use engine::{Engine, EngineBuilder, VOTE_METRIC};
pub use error::{Error, ErrorKind, Result, StoreError};
pub use estimator::{Confidence, UnlockEstimate};
pub use events::{EventSink, NullSink, ProgressionEvent, RecordingSink};
pub use gate::{lock_reason, EngagementRecorder, FeatureGate};
pub use identity::{DefaultIdentityResolver, IdentityResolver};
pub use model::{
    Engagement, EngagementMetric, ProgressId, SessionId, SessionStatus, Target, UnlockProgress,
    UnlockRecord, UnlockSource, VotingOption, VotingSession,
};
pub use status::{ProgressView, ProgressionStatus};
pub use store::{MemoryStore, PersistedState, Store, StoreBatch, StoreOp};
pub use velocity::{Trend, VelocityMetrics, DEFAULT_VELOCITY_DAYS};
pub use voting::{resolve_winner, SessionResolution, SessionView, VoteReceipt};
