//! Engagement velocity.
//!
//! Keeps a per-day total of applied scores for the retention window and
//! derives points/day and a coarse trend from it.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::clock::DAY_MS;

/// Period used when the caller asks for 0 days.
pub const DEFAULT_VELOCITY_DAYS: u32 = 7;

/// Relative change between halves that counts as a trend.
const TREND_BAND: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityMetrics {
    pub points_per_day: f64,
    pub trend: Trend,
    pub period_days: u32,
    /// Days in the period with at least one contribution.
    pub sample_size: u32,
    pub total_points: u64,
}

/// Day index (days since epoch) -> points.
#[derive(Debug, Clone)]
pub(crate) struct DailyHistogram {
    days: BTreeMap<u64, u64>,
    retention_days: u32,
}

impl DailyHistogram {
    pub fn new(retention_days: u32) -> Self {
        Self {
            days: BTreeMap::new(),
            retention_days: retention_days.max(1),
        }
    }

    pub fn record(&mut self, at_ms: u64, points: u64) {
        if points == 0 {
            return;
        }
        let day = self.days.entry(at_ms / DAY_MS).or_default();
        *day = day.saturating_add(points);
    }

    /// Drop days older than the retention window.
    pub fn prune(&mut self, now_ms: u64) {
        let oldest = (now_ms / DAY_MS).saturating_sub(u64::from(self.retention_days) - 1);
        self.days = self.days.split_off(&oldest);
    }

    /// Velocity over the last `period_days` days, today included.
    pub fn metrics(&self, now_ms: u64, period_days: u32) -> VelocityMetrics {
        let period_days = match period_days {
            0 => DEFAULT_VELOCITY_DAYS,
            d => d.min(self.retention_days),
        };
        let today = now_ms / DAY_MS;
        let first = today.saturating_sub(u64::from(period_days) - 1);

        let samples: Vec<u64> = self.days.range(first..=today).map(|(_, &p)| p).collect();
        let total_points = samples.iter().fold(0u64, |sum, &p| sum.saturating_add(p));

        VelocityMetrics {
            points_per_day: total_points as f64 / f64::from(period_days),
            trend: trend(&samples),
            period_days,
            sample_size: samples.len() as u32,
            total_points,
        }
    }
}

/// Compare the average of the later half of `samples` against the earlier half.
fn trend(samples: &[u64]) -> Trend {
    if samples.len() < 2 {
        return Trend::Stable;
    }
    let half = samples.len() / 2;
    let (early, late) = samples.split_at(half);
    let avg = |s: &[u64]| s.iter().map(|&p| p as f64).sum::<f64>() / s.len() as f64;
    let (early, late) = (avg(early), avg(late));

    if late > early * (1.0 + TREND_BAND) {
        Trend::Increasing
    } else if late < early * (1.0 - TREND_BAND) {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 100 * DAY_MS + 1_000;

    #[test]
    fn empty_histogram_is_stable_zero() {
        let h = DailyHistogram::new(30);
        let m = h.metrics(NOW, 7);
        assert_eq!(m.points_per_day, 0.0);
        assert_eq!(m.sample_size, 0);
        assert_eq!(m.trend, Trend::Stable);
    }

    #[test]
    fn averages_over_full_period() {
        let mut h = DailyHistogram::new(30);
        h.record(NOW, 70);
        h.record(NOW - DAY_MS, 70);
        let m = h.metrics(NOW, 7);
        assert_eq!(m.total_points, 140);
        assert_eq!(m.points_per_day, 20.0);
        assert_eq!(m.sample_size, 2);
    }

    #[test]
    fn excludes_days_outside_period() {
        let mut h = DailyHistogram::new(30);
        h.record(NOW - 10 * DAY_MS, 1_000);
        h.record(NOW, 7);
        assert_eq!(h.metrics(NOW, 7).total_points, 7);
        assert_eq!(h.metrics(NOW, 0).period_days, DEFAULT_VELOCITY_DAYS);
    }

    #[test]
    fn detects_trends() {
        assert_eq!(trend(&[10, 10, 20, 20]), Trend::Increasing);
        assert_eq!(trend(&[20, 20, 10, 10]), Trend::Decreasing);
        assert_eq!(trend(&[100, 105]), Trend::Stable);
        assert_eq!(trend(&[5]), Trend::Stable);
    }

    #[test]
    fn totals_saturate() {
        let mut h = DailyHistogram::new(30);
        h.record(NOW, u64::MAX);
        h.record(NOW, 1);
        h.record(NOW - DAY_MS, u64::MAX);
        let m = h.metrics(NOW, 7);
        assert_eq!(m.total_points, u64::MAX);
        assert_eq!(m.sample_size, 2);
        assert_eq!(m.trend, Trend::Stable);
    }

    #[test]
    fn prune_drops_old_days() {
        let mut h = DailyHistogram::new(3);
        h.record(NOW - 5 * DAY_MS, 10);
        h.record(NOW - 2 * DAY_MS, 10);
        h.prune(NOW);
        assert_eq!(h.days.len(), 1);
    }
}
