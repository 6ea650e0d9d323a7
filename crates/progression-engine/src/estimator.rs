//! Unlock time projection.
//!
//! Velocity is the active counter divided by the days since it started.
//! Projections with no velocity, no elapsed time or a date past the end of
//! the clock are reported without an estimate rather than as infinity.

use serde::Serialize;

use crate::clock::{DAY_MS, HOUR_MS};
use crate::model::UnlockProgress;
use crate::velocity::Trend;

/// Confidence band on an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnlockEstimate {
    pub node_key: String,
    pub target_level: u32,
    pub accumulated: u64,
    pub cost: u64,
    pub remaining: u64,
    pub velocity_per_day: f64,
    pub elapsed_hours: f64,
    /// `None` when there is nothing to project from.
    pub estimated_days: Option<f64>,
    pub estimated_unlock_at: Option<u64>,
    pub confidence: Confidence,
}

/// Project when `progress` reaches its target.
///
/// `progress` must have a target; callers check that first.
pub fn estimate(
    progress: &UnlockProgress,
    now_ms: u64,
    min_sample_hours: f64,
    trend: Trend,
) -> Option<UnlockEstimate> {
    let target = progress.target.as_ref()?;
    let elapsed_ms = now_ms.saturating_sub(progress.observed_since());
    let elapsed_hours = elapsed_ms as f64 / HOUR_MS as f64;
    let elapsed_days = elapsed_ms as f64 / DAY_MS as f64;
    let remaining = target.cost.saturating_sub(progress.accumulated);

    let velocity_per_day = if elapsed_ms > 0 {
        progress.accumulated as f64 / elapsed_days
    } else {
        0.0
    };

    let projected = if remaining == 0 {
        Some((0.0, now_ms))
    } else if velocity_per_day > 0.0 {
        let days = remaining as f64 / velocity_per_day;
        after_days(now_ms, days).map(|at| (days, at))
    } else {
        None
    };

    let confidence = match projected {
        None => Confidence::Low,
        Some(_) => band(elapsed_hours, min_sample_hours, trend),
    };

    Some(UnlockEstimate {
        node_key: target.node_key.clone(),
        target_level: target.level,
        accumulated: progress.accumulated,
        cost: target.cost,
        remaining,
        velocity_per_day,
        elapsed_hours,
        estimated_days: projected.map(|(days, _)| days),
        estimated_unlock_at: projected.map(|(_, at)| at),
        confidence,
    })
}

fn band(elapsed_hours: f64, min_sample_hours: f64, trend: Trend) -> Confidence {
    if elapsed_hours < min_sample_hours {
        Confidence::Low
    } else if elapsed_hours < min_sample_hours * 4.0 || trend == Trend::Decreasing {
        Confidence::Medium
    } else {
        Confidence::High
    }
}

/// Projected unlock time for a cost at a given velocity, if any.
pub fn project(now_ms: u64, cost: u64, points_per_day: f64) -> Option<u64> {
    if cost == 0 {
        return Some(now_ms);
    }
    if points_per_day <= 0.0 {
        return None;
    }
    after_days(now_ms, cost as f64 / points_per_day)
}

/// `now_ms` plus `days`, `None` when that is not a representable time.
fn after_days(now_ms: u64, days: f64) -> Option<u64> {
    let offset = (days * DAY_MS as f64).round();
    if !offset.is_finite() || offset < 0.0 || offset >= u64::MAX as f64 {
        return None;
    }
    now_ms.checked_add(offset as u64)
}
