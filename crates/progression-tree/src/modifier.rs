//! Value modifiers carried by upgrade nodes.
//!
//! A node with a modifier adjusts a named value (such as
//! [`PROGRESSION_RATE`]) according to its unlocked level. Several nodes may
//! modify the same value; they stack in catalog order, each applied to the
//! result of the previous one.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Value applied to every engagement score.
pub const PROGRESSION_RATE: &str = "progression_rate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModifierType {
    /// `value × term`
    #[default]
    Multiplicative,
    /// `value + term`
    Additive,
    /// `term`, ignoring the incoming value
    Fixed,
}

/// How a node modifies a value as it levels up.
///
/// The level-scaled term is `base_value + per_level_value × level`, clamped
/// to `min_value..=max_value` when given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierConfig {
    pub feature_key: String,
    #[serde(default)]
    pub modifier_type: ModifierType,
    pub base_value: f64,
    #[serde(default)]
    pub per_level_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
}

impl ModifierConfig {
    /// Level-scaled term, clamped.
    pub fn term(&self, level: u32) -> f64 {
        let mut term = self.base_value + self.per_level_value * f64::from(level);
        if let Some(max) = self.max_value {
            term = term.min(max);
        }
        if let Some(min) = self.min_value {
            term = term.max(min);
        }
        term
    }

    /// Apply to `value` for a node at `level`. Locked nodes change nothing.
    pub fn apply(&self, value: f64, level: u32) -> f64 {
        if level == 0 {
            return value;
        }
        let term = self.term(level);
        match self.modifier_type {
            ModifierType::Multiplicative => value * term,
            ModifierType::Additive => value + term,
            ModifierType::Fixed => term,
        }
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.feature_key.trim().is_empty() {
            return Err("modifier feature_key is empty".into());
        }
        let bounds = [Some(self.base_value), Some(self.per_level_value), self.min_value, self.max_value];
        if bounds.iter().flatten().any(|v| !v.is_finite()) {
            return Err("modifier values must be finite".into());
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(format!("modifier min_value {min} above max_value {max}"));
            }
        }
        Ok(())
    }
}

/// A modifier together with the current level of the node carrying it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveModifier {
    pub node_id: NodeId,
    pub node_key: String,
    pub level: u32,
    #[serde(flatten)]
    pub config: ModifierConfig,
}

impl ActiveModifier {
    pub fn apply(&self, value: f64) -> f64 {
        self.config.apply(value, self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(base: f64, per_level: f64) -> ModifierConfig {
        ModifierConfig {
            feature_key: PROGRESSION_RATE.into(),
            modifier_type: ModifierType::Multiplicative,
            base_value: base,
            per_level_value: per_level,
            max_value: None,
            min_value: None,
        }
    }

    #[test]
    fn multiplicative_scales_with_level() {
        let m = rate(1.0, 0.1);
        assert!((m.apply(100.0, 1) - 110.0).abs() < 1e-9);
        assert!((m.apply(100.0, 3) - 130.0).abs() < 1e-9);
        assert!((m.apply(100.0, 5) - 150.0).abs() < 1e-9);
        assert_eq!(m.apply(100.0, 0), 100.0);
    }

    #[test]
    fn term_is_clamped() {
        let mut m = rate(1.0, 0.5);
        m.max_value = Some(2.0);
        assert_eq!(m.term(10), 2.0);

        let mut m = rate(0.0, -1.0);
        m.min_value = Some(-2.0);
        m.modifier_type = ModifierType::Additive;
        assert_eq!(m.apply(10.0, 5), 8.0);
    }

    #[test]
    fn fixed_replaces_value() {
        let mut m = rate(3.0, 1.0);
        m.modifier_type = ModifierType::Fixed;
        assert_eq!(m.apply(100.0, 2), 5.0);
    }

    #[test]
    fn validate_rejects_bad_configs() {
        assert!(rate(1.0, 0.1).validate().is_ok());
        assert!(rate(f64::NAN, 0.1).validate().is_err());

        let mut m = rate(1.0, 0.1);
        m.feature_key = " ".into();
        assert!(m.validate().is_err());

        let mut m = rate(1.0, 0.1);
        m.min_value = Some(2.0);
        m.max_value = Some(1.0);
        assert!(m.validate().is_err());
    }

    #[test]
    fn parses_with_defaults() {
        let m: ModifierConfig =
            serde_json::from_str(r#"{ "feature_key": "progression_rate", "base_value": 1.0 }"#)
                .unwrap();
        assert_eq!(m.modifier_type, ModifierType::Multiplicative);
        assert_eq!(m.per_level_value, 0.0);
        assert_eq!(m.max_value, None);
    }
}
