//! Contribution scoring and bookkeeping.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::model::{Engagement, EngagementMetric, ProgressId, UnlockRecord};

/// Default leaderboard size.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Largest leaderboard a caller may request.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Largest `value` a single engagement may carry.
pub const MAX_ENGAGEMENT_VALUE: u64 = 1_000_000;

/// Result of one `record_engagement` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementOutcome {
    /// Points applied after the multiplier.
    pub score: u64,
    /// Progress the points landed on, if any.
    pub progress_id: Option<ProgressId>,
    /// Counter after this engagement, before any unlock retired it.
    pub accumulated: u64,
    /// Unlock committed by this engagement.
    pub unlocked: Option<UnlockRecord>,
    /// The event id was already seen; nothing was applied.
    pub duplicate: bool,
}

impl EngagementOutcome {
    pub(crate) fn duplicate() -> Self {
        Self {
            score: 0,
            progress_id: None,
            accumulated: 0,
            unlocked: None,
            duplicate: true,
        }
    }
}

/// Reject engagements that cannot be attributed.
pub fn validate(engagement: &Engagement) -> Result<()> {
    if engagement.actor.trim().is_empty() {
        return Err(Error::InvalidEngagement("actor is empty".into()));
    }
    if engagement.metric_type.trim().is_empty() {
        return Err(Error::InvalidEngagement("metric_type is empty".into()));
    }
    if engagement.event_id.as_deref().is_some_and(|id| id.is_empty()) {
        return Err(Error::InvalidEngagement("event_id is empty".into()));
    }
    if engagement.value > MAX_ENGAGEMENT_VALUE {
        return Err(Error::InvalidEngagement(format!(
            "value {} exceeds {}",
            engagement.value, MAX_ENGAGEMENT_VALUE
        )));
    }
    Ok(())
}

/// `value × weight` before modifiers; non-positive or non-finite weights give 0.
pub fn base_score(value: u64, weight: f64) -> f64 {
    if !weight.is_finite() || weight <= 0.0 {
        return 0.0;
    }
    value as f64 * weight
}

/// Whole points from a raw score, floored and saturating.
pub fn to_points(raw: f64) -> u64 {
    if raw.is_nan() || raw <= 0.0 {
        return 0;
    }
    raw.floor() as u64
}

/// `floor(value × weight)`.
pub fn score(value: u64, weight: f64) -> u64 {
    to_points(base_score(value, weight))
}

/// Bounded memory of recently accepted event ids.
#[derive(Debug, Clone)]
pub(crate) struct DedupeWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl DedupeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity,
        }
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    pub fn insert(&mut self, event_id: &str) {
        if self.capacity == 0 || !self.seen.insert(event_id.to_string()) {
            return;
        }
        self.order.push_back(event_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricTotals {
    pub events: u64,
    pub value: u64,
    pub score: u64,
}

/// All-time contribution totals of one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContributionBreakdown {
    pub actor: String,
    pub total_score: u64,
    pub events: u64,
    pub by_metric: BTreeMap<String, MetricTotals>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub actor: String,
    pub total_score: u64,
    pub events: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Contributors {
    by_actor: HashMap<String, ContributionBreakdown>,
}

impl Contributors {
    pub fn record(&mut self, metric: &EngagementMetric) {
        let entry = self
            .by_actor
            .entry(metric.actor.clone())
            .or_insert_with(|| ContributionBreakdown {
                actor: metric.actor.clone(),
                ..Default::default()
            });
        entry.total_score = entry.total_score.saturating_add(metric.score);
        entry.events += 1;
        let totals = entry.by_metric.entry(metric.metric_type.clone()).or_default();
        totals.events += 1;
        totals.value = totals.value.saturating_add(metric.value);
        totals.score = totals.score.saturating_add(metric.score);
    }

    pub fn breakdown(&self, actor: &str) -> ContributionBreakdown {
        self.by_actor
            .get(actor)
            .cloned()
            .unwrap_or_else(|| ContributionBreakdown {
                actor: actor.to_string(),
                ..Default::default()
            })
    }

    /// Top contributors by score; ties by actor name.
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let limit = match limit {
            0 => DEFAULT_LEADERBOARD_LIMIT,
            n => n.min(MAX_LEADERBOARD_LIMIT),
        };
        let mut actors: Vec<&ContributionBreakdown> = self.by_actor.values().collect();
        actors.sort_by(|a, b| {
            b.total_score
                .cmp(&a.total_score)
                .then_with(|| a.actor.cmp(&b.actor))
        });
        actors
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, c)| LeaderboardEntry {
                rank: i as u32 + 1,
                actor: c.actor.clone(),
                total_score: c.total_score,
                events: c.events,
            })
            .collect()
    }
}
