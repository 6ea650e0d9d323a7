//! Progression node model.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::modifier::ModifierConfig;
use crate::prerequisite::{DynamicPrerequisite, Prerequisite};

/// Numeric node identity, assigned in catalog order starting at 1.
///
/// Ordering by id is the catalog display order and the tie-break order used
/// when resolving votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Feature,
    Item,
    Upgrade,
}

/// Relative size of a node, scaling its base unlock cost 1:2:4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeSize {
    #[default]
    Small,
    Medium,
    Large,
}

/// A feature key gated by a node at a given level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatedFeature {
    pub key: String,
    pub level: u32,
}

impl GatedFeature {
    pub fn new(key: impl Into<String>, level: u32) -> Self {
        Self {
            key: key.into(),
            level,
        }
    }
}

/// A single unlockable node in the progression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionNode {
    pub id: NodeId,
    /// Stable key (e.g. `feature_compost`).
    pub key: String,
    /// Human-readable name used in locked-feature messages.
    pub name: String,
    pub description: String,
    pub kind: NodeKind,
    pub category: String,
    pub tier: u32,
    pub size: NodeSize,
    /// Highest level this node can reach (>= 1).
    pub max_level: u32,
    /// Unlock cost for each level; `costs[0]` is level 1.
    pub costs: Vec<u64>,
    /// Nodes that must reach a level before this one is eligible.
    pub prerequisites: Vec<Prerequisite>,
    /// Count-based conditions on the rest of the tree.
    pub dynamic_prerequisites: Vec<DynamicPrerequisite>,
    /// Features this node gates besides its own key.
    pub features: Vec<GatedFeature>,
    /// Unlocked to level 1 when the tree is first installed.
    pub auto_unlock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<ModifierConfig>,
}

impl ProgressionNode {
    /// Unlock cost for `level`, or `None` outside `1..=max_level`.
    pub fn cost_for_level(&self, level: u32) -> Option<u64> {
        if level == 0 || level > self.max_level {
            return None;
        }
        self.costs.get(level as usize - 1).copied()
    }

    /// Next level to unlock given the current one, `None` when maxed.
    pub fn next_level(&self, current: u32) -> Option<u32> {
        (current < self.max_level).then_some(current + 1)
    }

    /// Whether `current` is the node's max level.
    pub fn is_maxed(&self, current: u32) -> bool {
        current >= self.max_level
    }

    /// Every feature gated by this node, including its own key at level 1.
    pub fn gated_features(&self) -> impl Iterator<Item = (&str, u32)> {
        std::iter::once((self.key.as_str(), 1))
            .chain(self.features.iter().map(|f| (f.key.as_str(), f.level)))
    }
}

/// A node with its current unlock status, for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: ProgressionNode,
    pub unlocked_level: u32,
    pub is_unlocked: bool,
    /// Nodes that list this one as a prerequisite.
    pub children: Vec<NodeId>,
}
