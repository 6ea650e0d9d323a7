//! Prerequisite parsing.
//!
//! A prerequisite string in the tree file is either:
//!
//! - a static node key, optionally with a level: `forge_1` or `forge_1@2`
//! - a dynamic condition starting with `-`:
//!   - `-total_nodes_unlocked:N`
//!   - `-nodes_unlocked_below_tier:T:N`

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};

/// A static prerequisite: `node_key` must be unlocked to at least `level`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prerequisite {
    pub node_key: String,
    pub level: u32,
}

/// A count-based prerequisite evaluated against the whole tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DynamicPrerequisite {
    /// At least `count` nodes unlocked anywhere in the tree.
    TotalNodesUnlocked { count: u32 },
    /// At least `count` unlocked nodes with a tier strictly below `tier`.
    NodesUnlockedBelowTier { tier: u32, count: u32 },
}

/// Parsed form of a prerequisite string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPrerequisite {
    Static(Prerequisite),
    Dynamic(DynamicPrerequisite),
}

/// Parse one prerequisite string.
pub fn parse_prerequisite(raw: &str) -> Result<ParsedPrerequisite> {
    let invalid = |reason: &str| TreeError::InvalidPrerequisite(raw.to_string(), reason.to_string());

    let Some(dynamic) = raw.strip_prefix('-') else {
        let (key, level) = match raw.split_once('@') {
            Some((key, level)) => {
                let level: u32 = level.parse().map_err(|_| invalid("level is not a number"))?;
                (key, level)
            }
            None => (raw, 1),
        };
        if key.is_empty() {
            return Err(invalid("empty node key"));
        }
        if level == 0 {
            return Err(invalid("level must be at least 1"));
        }
        return Ok(ParsedPrerequisite::Static(Prerequisite {
            node_key: key.to_string(),
            level,
        }));
    };

    let parts: Vec<&str> = dynamic.split(':').collect();
    let number = |s: &str, what: &str| -> Result<u32> {
        s.parse::<u32>()
            .map_err(|_| invalid(&format!("{what} is not a number")))
    };

    let parsed = match parts.as_slice() {
        ["total_nodes_unlocked", count] => DynamicPrerequisite::TotalNodesUnlocked {
            count: number(count, "count")?,
        },
        ["nodes_unlocked_below_tier", tier, count] => DynamicPrerequisite::NodesUnlockedBelowTier {
            tier: number(tier, "tier")?,
            count: number(count, "count")?,
        },
        ["total_nodes_unlocked", ..] => {
            return Err(invalid("expected -total_nodes_unlocked:count"))
        }
        ["nodes_unlocked_below_tier", ..] => {
            return Err(invalid("expected -nodes_unlocked_below_tier:tier:count"))
        }
        _ => return Err(invalid("unknown dynamic prerequisite type")),
    };

    let count = match parsed {
        DynamicPrerequisite::TotalNodesUnlocked { count } => count,
        DynamicPrerequisite::NodesUnlockedBelowTier { count, .. } => count,
    };
    if count == 0 {
        return Err(invalid("count must be > 0"));
    }

    Ok(ParsedPrerequisite::Dynamic(parsed))
}
