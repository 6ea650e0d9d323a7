//! Unlock cost model.
//!
//! Costs scale with size (1:2:4) and exponentially with tier:
//!
//! ```text
//! cost(level) = round(base(size) × 1.5^tier) × level
//! ```
//!
//! The per-level factor keeps the table non-decreasing.

use crate::node::NodeSize;

/// Base cost of a small node at tier 0.
pub const BASE_COST_SMALL: u64 = 500;

/// Base cost of a medium node at tier 0.
pub const BASE_COST_MEDIUM: u64 = 1_000;

/// Base cost of a large node at tier 0.
pub const BASE_COST_LARGE: u64 = 2_000;

/// Growth factor per tier.
pub const TIER_SCALING_FACTOR: f64 = 1.5;

/// Base cost for a node size.
pub const fn base_cost(size: NodeSize) -> u64 {
    match size {
        NodeSize::Small => BASE_COST_SMALL,
        NodeSize::Medium => BASE_COST_MEDIUM,
        NodeSize::Large => BASE_COST_LARGE,
    }
}

/// Level-1 cost for a node of the given tier and size.
pub fn unlock_cost(tier: u32, size: NodeSize) -> u64 {
    let scaled = base_cost(size) as f64 * TIER_SCALING_FACTOR.powi(tier as i32);
    scaled.round() as u64
}

/// Full per-level cost table.
pub fn cost_table(tier: u32, size: NodeSize, max_level: u32) -> Vec<u64> {
    let base = unlock_cost(tier, size);
    (1..=max_level as u64).map(|level| base.saturating_mul(level)).collect()
}

/// Check a cost table: one entry per level and non-decreasing.
pub fn validate_costs(costs: &[u64], max_level: u32) -> Result<(), String> {
    if costs.len() != max_level as usize {
        return Err(format!(
            "expected {} cost entries, got {}",
            max_level,
            costs.len()
        ));
    }
    if let Some(level) = costs.windows(2).position(|w| w[1] < w[0]) {
        return Err(format!(
            "cost for level {} is lower than level {}",
            level + 2,
            level + 1
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tier_zero_is_base() {
        assert_eq!(unlock_cost(0, NodeSize::Small), 500);
        assert_eq!(unlock_cost(0, NodeSize::Medium), 1_000);
        assert_eq!(unlock_cost(0, NodeSize::Large), 2_000);
    }

    #[test]
    fn tiers_scale_by_one_and_a_half() {
        assert_eq!(unlock_cost(1, NodeSize::Small), 750);
        assert_eq!(unlock_cost(2, NodeSize::Small), 1_125);
        assert_eq!(unlock_cost(3, NodeSize::Medium), 3_375);
        // 500 × 5.0625 = 2531.25
        assert_eq!(unlock_cost(4, NodeSize::Small), 2_531);
    }

    #[test]
    fn table_is_linear_in_level() {
        assert_eq!(cost_table(1, NodeSize::Small, 3), vec![750, 1_500, 2_250]);
    }

    #[test]
    fn validate_rejects_decreasing() {
        assert!(validate_costs(&[100, 200, 200], 3).is_ok());
        assert!(validate_costs(&[100, 50], 2).is_err());
        assert!(validate_costs(&[100], 2).is_err());
    }

    proptest! {
        #[test]
        fn generated_tables_are_non_decreasing(tier in 0u32..10, max_level in 1u32..8) {
            for size in [NodeSize::Small, NodeSize::Medium, NodeSize::Large] {
                let table = cost_table(tier, size, max_level);
                prop_assert!(validate_costs(&table, max_level).is_ok());
            }
        }
    }
}
