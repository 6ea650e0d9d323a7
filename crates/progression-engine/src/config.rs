//! Engine tuning.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::clock::HOUR_MS;

/// What happens after a node level is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetargetPolicy {
    /// Always open a new vote.
    #[default]
    Vote,
    /// Keep targeting the same node until it reaches max level, then vote.
    SameNodeUntilMax,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a voting session stays open before the scheduler closes it.
    pub voting_duration_ms: u64,
    /// Upper bound on options offered per session.
    pub max_voting_options: usize,
    /// Resolve a session immediately when only one node is eligible.
    pub auto_select_single_option: bool,
    pub retarget_policy: RetargetPolicy,
    /// Observation time below which an estimate is low confidence.
    pub min_sample_hours: f64,
    /// Number of recent event ids remembered for duplicate detection.
    pub dedupe_window: usize,
    /// Score multiplier per metric type.
    pub metric_weights: HashMap<String, f64>,
    /// Multiplier for metric types not listed in `metric_weights`.
    pub default_metric_weight: f64,
    /// Days of daily engagement totals kept for velocity reporting.
    pub velocity_retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let metric_weights = [
            ("message", 1.0),
            ("command", 2.0),
            ("item_crafted", 3.0),
            ("vote_cast", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            voting_duration_ms: 24 * HOUR_MS,
            max_voting_options: 4,
            auto_select_single_option: true,
            retarget_policy: RetargetPolicy::Vote,
            min_sample_hours: 6.0,
            dedupe_window: 10_000,
            metric_weights,
            default_metric_weight: 1.0,
            velocity_retention_days: 30,
        }
    }
}

impl EngineConfig {
    /// Multiplier applied to `metric_type`.
    pub fn weight_for(&self, metric_type: &str) -> f64 {
        self.metric_weights
            .get(metric_type)
            .copied()
            .unwrap_or(self.default_metric_weight)
    }

    #[must_use]
    pub fn with_voting_duration_ms(mut self, ms: u64) -> Self {
        self.voting_duration_ms = ms;
        self
    }

    #[must_use]
    pub fn with_max_voting_options(mut self, max: usize) -> Self {
        self.max_voting_options = max.max(1);
        self
    }

    #[must_use]
    pub fn with_auto_select_single_option(mut self, enabled: bool) -> Self {
        self.auto_select_single_option = enabled;
        self
    }

    #[must_use]
    pub fn with_retarget_policy(mut self, policy: RetargetPolicy) -> Self {
        self.retarget_policy = policy;
        self
    }

    #[must_use]
    pub fn with_min_sample_hours(mut self, hours: f64) -> Self {
        self.min_sample_hours = hours;
        self
    }

    #[must_use]
    pub fn with_metric_weight(mut self, metric_type: impl Into<String>, weight: f64) -> Self {
        self.metric_weights.insert(metric_type.into(), weight);
        self
    }
}
