//! Progression Tree
//!
//! The static half of the progression system: the node table, per-level
//! unlock costs, the prerequisite DAG and the feature gates each node owns.
//!
//! # Model
//!
//! Each node has a stable key and a numeric id assigned in catalog order.
//! A node can be unlocked up to `max_level` times; level `L` costs
//! `costs[L - 1]` contribution points. A node gates its own key at level 1
//! plus any extra features it lists.
//!
//! # Prerequisites
//!
//! Static prerequisites (`key` or `key@level`) form a DAG checked for cycles
//! at load time. Dynamic prerequisites count unlocked nodes across the tree
//! and only affect vote eligibility.
//!
//! # Modifiers
//!
//! Upgrade nodes may carry a [`ModifierConfig`] that scales a named value
//! (such as [`PROGRESSION_RATE`]) by their unlocked level.
//!
//! Unlock state is not stored here: queries take an [`UnlockedLevels`] map
//! owned by the caller.

mod catalog;
mod cost;
mod error;
mod loader;
mod modifier;
mod node;
mod prerequisite;

pub use catalog::{item_node_key, level_of, Catalog, UnlockedLevels, ITEM_KEY_PREFIX};
pub use cost::{
    base_cost, cost_table, unlock_cost, validate_costs, BASE_COST_LARGE, BASE_COST_MEDIUM,
    BASE_COST_SMALL, TIER_SCALING_FACTOR,
};
pub use error::{Result, TreeError};
pub use loader::{load_tree_file, load_tree_str, FeatureConfig, NodeConfig, TreeConfig};
pub use modifier::{ActiveModifier, ModifierConfig, ModifierType, PROGRESSION_RATE};
pub use node::{GatedFeature, NodeId, NodeKind, NodeSize, ProgressionNode, TreeNode};
pub use prerequisite::{parse_prerequisite, DynamicPrerequisite, ParsedPrerequisite, Prerequisite};
