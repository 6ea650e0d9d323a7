//! Persisted progression records.

use progression_tree::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Voting session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unlock progress identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressId(pub u64);

impl fmt::Display for ProgressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// One candidate in a voting session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingOption {
    pub node_id: NodeId,
    pub node_key: String,
    pub node_name: String,
    /// Level the node would be unlocked to if it wins.
    pub target_level: u32,
    pub votes: u64,
    /// Projected unlock time (ms) from recent velocity, filled on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_unlock_at: Option<u64>,
}

/// A community vote choosing the next target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: SessionId,
    pub status: SessionStatus,
    /// Candidates in catalog order.
    pub options: Vec<VotingOption>,
    pub opened_at: u64,
    pub closes_at: u64,
    pub closed_at: Option<u64>,
    /// Voter identity -> option index.
    pub voters: HashMap<String, usize>,
    /// Index of the winning option once resolved.
    pub winner: Option<usize>,
}

impl VotingSession {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.voters.contains_key(voter)
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    pub fn winning_option(&self) -> Option<&VotingOption> {
        self.winner.and_then(|i| self.options.get(i))
    }

    /// Mark closed with the given winner.
    pub(crate) fn close(&mut self, winner: Option<usize>, now: u64) {
        self.status = SessionStatus::Closed;
        self.closed_at = Some(now);
        self.winner = winner;
    }
}

/// The node and level a progress counter is working toward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub node_id: NodeId,
    pub node_key: String,
    pub level: u32,
    pub cost: u64,
}

/// Contribution counter toward one target.
///
/// A `None` target means a vote is in progress; points still accumulate and
/// count toward the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockProgress {
    pub id: ProgressId,
    pub target: Option<Target>,
    pub accumulated: u64,
    pub started_at: u64,
    pub target_set_at: Option<u64>,
    pub session_id: Option<SessionId>,
    /// Set when the progress is retired (unlocked, reset or superseded).
    pub retired_at: Option<u64>,
}

impl UnlockProgress {
    pub(crate) fn new(id: ProgressId, now: u64) -> Self {
        Self {
            id,
            target: None,
            accumulated: 0,
            started_at: now,
            target_set_at: None,
            session_id: None,
            retired_at: None,
        }
    }

    /// Whether the counter has reached the target cost.
    pub fn is_complete(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(|t| self.accumulated >= t.cost)
    }

    /// Rounded percentage toward the target, 0 without a target.
    pub fn completion_percent(&self) -> u32 {
        match &self.target {
            Some(t) if t.cost > 0 => {
                ((self.accumulated as f64 / t.cost as f64) * 100.0).round() as u32
            }
            Some(_) => 100,
            None => 0,
        }
    }

    /// Start of the observation window used for velocity.
    ///
    /// Points banked while a vote ran count toward the counter, so the window
    /// starts with the counter rather than with the target.
    pub fn observed_since(&self) -> u64 {
        self.started_at
    }
}

/// A contribution event as submitted by a feature module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    /// Account id, not platform-qualified.
    pub actor: String,
    pub metric_type: String,
    pub value: u64,
    /// Idempotency key; repeats within the dedupe window are ignored.
    #[serde(default)]
    pub event_id: Option<String>,
}

impl Engagement {
    pub fn new(actor: impl Into<String>, metric_type: impl Into<String>, value: u64) -> Self {
        Self {
            actor: actor.into(),
            metric_type: metric_type.into(),
            value,
            event_id: None,
        }
    }

    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }
}

/// Append-only record of an accepted engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetric {
    pub actor: String,
    pub metric_type: String,
    pub value: u64,
    /// Points applied after the metric multiplier.
    pub score: u64,
    pub event_id: Option<String>,
    pub progress_id: Option<ProgressId>,
    pub recorded_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockSource {
    Contribution,
    Admin,
    AutoUnlock,
    Instant,
}

/// Append-only record of a level being unlocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub node_id: NodeId,
    pub node_key: String,
    pub level: u32,
    pub source: UnlockSource,
    pub progress_id: Option<ProgressId>,
    /// Points accumulated by the retired progress, overshoot included.
    pub contributions: u64,
    pub unlocked_at: u64,
}
