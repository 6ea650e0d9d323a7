//! Tree file loading.
//!
//! The tree is described by a JSON document:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "description": "Community progression",
//!   "nodes": [
//!     { "key": "forge_1", "name": "Forge", "type": "feature", "tier": 0,
//!       "size": "small", "max_level": 1, "category": "crafting",
//!       "prerequisites": [], "features": ["feature_forge"] },
//!     { "key": "upgrade_progression_basic", "name": "Study", "type": "upgrade",
//!       "max_level": 5, "modifier_config": { "feature_key": "progression_rate",
//!       "modifier_type": "multiplicative", "base_value": 1.0, "per_level_value": 0.1 } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::cost::cost_table;
use crate::error::Result;
use crate::modifier::ModifierConfig;
use crate::node::{GatedFeature, NodeId, NodeKind, NodeSize, ProgressionNode};
use crate::prerequisite::{parse_prerequisite, ParsedPrerequisite};

/// Root of a tree file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeConfig>,
}

/// One node as written in the tree file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub key: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tier: u32,
    #[serde(default)]
    pub size: NodeSize,
    #[serde(default = "default_max_level")]
    pub max_level: u32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
    /// Explicit per-level costs; generated from tier and size when absent.
    #[serde(default)]
    pub costs: Option<Vec<u64>>,
    #[serde(default)]
    pub auto_unlock: bool,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default, rename = "modifier_config")]
    pub modifier: Option<ModifierConfig>,
}

fn default_max_level() -> u32 {
    1
}

/// A gated feature: a bare key (level 1) or `{ "key", "level" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureConfig {
    Key(String),
    Leveled { key: String, level: u32 },
}

impl From<FeatureConfig> for GatedFeature {
    fn from(config: FeatureConfig) -> Self {
        match config {
            FeatureConfig::Key(key) => GatedFeature::new(key, 1),
            FeatureConfig::Leveled { key, level } => GatedFeature::new(key, level),
        }
    }
}

impl NodeConfig {
    fn into_node(self) -> Result<ProgressionNode> {
        let mut prerequisites = Vec::new();
        let mut dynamic_prerequisites = Vec::new();
        for raw in &self.prerequisites {
            match parse_prerequisite(raw)? {
                ParsedPrerequisite::Static(p) => prerequisites.push(p),
                ParsedPrerequisite::Dynamic(d) => dynamic_prerequisites.push(d),
            }
        }

        let costs = self
            .costs
            .unwrap_or_else(|| cost_table(self.tier, self.size, self.max_level));

        Ok(ProgressionNode {
            id: NodeId(0),
            key: self.key,
            name: self.name,
            description: self.description,
            kind: self.kind,
            category: self.category,
            tier: self.tier,
            size: self.size,
            max_level: self.max_level,
            costs,
            prerequisites,
            dynamic_prerequisites,
            features: self.features.into_iter().map(Into::into).collect(),
            auto_unlock: self.auto_unlock,
            modifier: self.modifier,
        })
    }
}

impl TreeConfig {
    /// Parse a tree document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate and build the catalog.
    ///
    /// Nodes are ordered by `sort_order`, then declaration order.
    pub fn into_catalog(self) -> Result<Catalog> {
        let mut configs = self.nodes;
        configs.sort_by_key(|n| n.sort_order);

        let nodes = configs
            .into_iter()
            .map(NodeConfig::into_node)
            .collect::<Result<Vec<_>>>()?;

        let catalog = Catalog::new(nodes)?;
        debug!(
            version = %self.version,
            nodes = catalog.len(),
            "Progression tree validated"
        );
        Ok(catalog)
    }
}

/// Load and validate a tree from a JSON string.
pub fn load_tree_str(json: &str) -> Result<Catalog> {
    TreeConfig::from_json(json)?.into_catalog()
}

/// Load and validate a tree file.
pub fn load_tree_file(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let catalog = load_tree_str(&json)?;
    info!(path = %path.display(), nodes = catalog.len(), "Loaded progression tree");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use crate::prerequisite::DynamicPrerequisite;

    const TREE: &str = r#"{
        "version": "1.0",
        "description": "test tree",
        "nodes": [
            { "key": "compost_bin", "name": "Compost Bin", "type": "feature",
              "tier": 1, "size": "medium", "max_level": 2, "category": "farming",
              "prerequisites": ["forge_1", "-total_nodes_unlocked:1"],
              "features": ["feature_compost", { "key": "feature_compost_bulk", "level": 2 }],
              "sort_order": 10 },
            { "key": "forge_1", "name": "Forge", "type": "feature",
              "tier": 0, "size": "small", "max_level": 1, "category": "crafting",
              "auto_unlock": true, "sort_order": 0 },
            { "key": "lucky_charm", "name": "Lucky Charm", "type": "upgrade",
              "max_level": 3, "costs": [0, 10, 10], "sort_order": 10 }
        ]
    }"#;

    #[test]
    fn loads_and_orders_by_sort_order() {
        let catalog = load_tree_str(TREE).unwrap();
        let keys: Vec<_> = catalog.nodes().iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["forge_1", "compost_bin", "lucky_charm"]);
    }

    #[test]
    fn generates_costs_when_absent() {
        let catalog = load_tree_str(TREE).unwrap();
        assert_eq!(catalog.get_by_key("forge_1").unwrap().costs, vec![500]);
        assert_eq!(
            catalog.get_by_key("compost_bin").unwrap().costs,
            vec![1_500, 3_000]
        );
        assert_eq!(
            catalog.get_by_key("lucky_charm").unwrap().costs,
            vec![0, 10, 10]
        );
    }

    #[test]
    fn splits_static_and_dynamic_prerequisites() {
        let catalog = load_tree_str(TREE).unwrap();
        let compost = catalog.get_by_key("compost_bin").unwrap();
        assert_eq!(compost.prerequisites.len(), 1);
        assert_eq!(compost.prerequisites[0].node_key, "forge_1");
        assert_eq!(
            compost.dynamic_prerequisites,
            vec![DynamicPrerequisite::TotalNodesUnlocked { count: 1 }]
        );
        assert_eq!(
            catalog.gating_nodes("feature_compost_bulk"),
            &[(compost.id, 2)]
        );
    }

    #[test]
    fn reads_modifier_config() {
        let json = r#"{ "nodes": [
            { "key": "upgrade_progression_basic", "name": "Study", "type": "upgrade",
              "max_level": 5, "costs": [10, 20, 30, 40, 50],
              "modifier_config": { "feature_key": "progression_rate",
                                   "modifier_type": "multiplicative",
                                   "base_value": 1.0, "per_level_value": 0.1 } }
        ] }"#;
        let catalog = load_tree_str(json).unwrap();
        let node = catalog.get_by_key("upgrade_progression_basic").unwrap();
        let modifier = node.modifier.as_ref().unwrap();
        assert_eq!(modifier.feature_key, "progression_rate");
        assert_eq!(modifier.per_level_value, 0.1);
        assert!(load_tree_str(TREE).unwrap().nodes().iter().all(|n| n.modifier.is_none()));
    }

    #[test]
    fn rejects_cyclic_tree() {
        let json = r#"{ "nodes": [
            { "key": "a", "name": "A", "prerequisites": ["b"] },
            { "key": "b", "name": "B", "prerequisites": ["a"] }
        ] }"#;
        assert!(matches!(load_tree_str(json), Err(TreeError::Cycle(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            load_tree_str("{ \"nodes\": "),
            Err(TreeError::Parse(_))
        ));
    }

    #[test]
    fn rejects_bad_dynamic_prerequisite() {
        let json = r#"{ "nodes": [
            { "key": "a", "name": "A", "prerequisites": ["-total_nodes_unlocked:0"] }
        ] }"#;
        assert!(matches!(
            load_tree_str(json),
            Err(TreeError::InvalidPrerequisite(..))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = std::env::temp_dir().join(format!("progression-tree-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tree.json");
        std::fs::write(&path, TREE).unwrap();

        let catalog = load_tree_file(&path).unwrap();
        assert_eq!(catalog.len(), 3);

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(load_tree_file(&path), Err(TreeError::Io(_))));
    }
}
