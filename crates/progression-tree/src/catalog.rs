//! Read-mostly node catalog.
//!
//! The catalog owns the immutable node table and the derived indexes
//! (key lookup, reverse prerequisite edges, feature gates). Everything that
//! depends on unlock state takes an [`UnlockedLevels`] map, so the catalog can
//! be shared freely between readers while the engine owns the mutable part.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Result, TreeError};
use crate::modifier::ActiveModifier;
use crate::node::{NodeId, ProgressionNode, TreeNode};
use crate::prerequisite::DynamicPrerequisite;

/// Node key prefix for items gated by the tree.
pub const ITEM_KEY_PREFIX: &str = "item_";

/// Node key gating `item_name`.
pub fn item_node_key(item_name: &str) -> String {
    format!("{ITEM_KEY_PREFIX}{item_name}")
}

/// Unlocked level per node. A missing entry means level 0 (locked).
pub type UnlockedLevels = BTreeMap<NodeId, u32>;

/// Level of `id` in `levels`, 0 when absent.
#[inline]
pub fn level_of(levels: &UnlockedLevels, id: NodeId) -> u32 {
    levels.get(&id).copied().unwrap_or(0)
}

/// Validated progression tree.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Nodes in catalog order; `nodes[i].id == NodeId(i + 1)`.
    nodes: Vec<ProgressionNode>,
    by_key: HashMap<String, NodeId>,
    children: Vec<Vec<NodeId>>,
    /// feature key -> (gating node, required level)
    gates: HashMap<String, Vec<(NodeId, u32)>>,
    /// modified value key -> nodes carrying a modifier for it
    modifiers: HashMap<String, Vec<NodeId>>,
}

impl Catalog {
    /// Build a catalog from nodes already in catalog order.
    ///
    /// Ids are reassigned 1..n. Fails on duplicate keys, unknown
    /// prerequisites, bad cost tables or a prerequisite cycle.
    pub fn new(mut nodes: Vec<ProgressionNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(TreeError::Empty);
        }

        let mut by_key = HashMap::with_capacity(nodes.len());
        for (index, node) in nodes.iter_mut().enumerate() {
            if node.key.is_empty() {
                return Err(TreeError::EmptyKey(index));
            }
            node.id = NodeId(index as u32 + 1);
            if by_key.insert(node.key.clone(), node.id).is_some() {
                return Err(TreeError::DuplicateKey(node.key.clone()));
            }
        }

        for node in &nodes {
            validate_node(node)?;
        }

        let mut children = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for prereq in &node.prerequisites {
                let Some(&parent) = by_key.get(&prereq.node_key) else {
                    return Err(TreeError::MissingPrerequisite {
                        node: node.key.clone(),
                        prerequisite: prereq.node_key.clone(),
                    });
                };
                let parent_node = &nodes[parent.0 as usize - 1];
                if prereq.level > parent_node.max_level {
                    return Err(TreeError::InvalidNode {
                        key: node.key.clone(),
                        reason: format!(
                            "prerequisite '{}' requires level {} but its max level is {}",
                            prereq.node_key, prereq.level, parent_node.max_level
                        ),
                    });
                }
                children[parent.0 as usize - 1].push(node.id);
            }
        }

        let mut gates: HashMap<String, Vec<(NodeId, u32)>> = HashMap::new();
        for node in &nodes {
            for (feature, level) in node.gated_features() {
                gates
                    .entry(feature.to_string())
                    .or_default()
                    .push((node.id, level));
            }
        }

        let mut modifiers: HashMap<String, Vec<NodeId>> = HashMap::new();
        for node in &nodes {
            if let Some(modifier) = &node.modifier {
                modifiers
                    .entry(modifier.feature_key.clone())
                    .or_default()
                    .push(node.id);
            }
        }

        let catalog = Self {
            nodes,
            by_key,
            children,
            gates,
            modifiers,
        };
        catalog.check_acyclic()?;
        Ok(catalog)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in catalog order.
    pub fn nodes(&self) -> &[ProgressionNode] {
        &self.nodes
    }

    pub fn get_node(&self, id: NodeId) -> Option<&ProgressionNode> {
        if id.0 == 0 {
            return None;
        }
        self.nodes.get(id.0 as usize - 1)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&ProgressionNode> {
        self.by_key.get(key).and_then(|&id| self.get_node(id))
    }

    /// Nodes that list `id` as a prerequisite.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        if id.0 == 0 {
            return &[];
        }
        self.children
            .get(id.0 as usize - 1)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes gating `feature_key` with the level each requires.
    pub fn gating_nodes(&self, feature_key: &str) -> &[(NodeId, u32)] {
        self.gates
            .get(feature_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes flagged for unlock at first boot.
    pub fn auto_unlock_nodes(&self) -> impl Iterator<Item = &ProgressionNode> {
        self.nodes.iter().filter(|n| n.auto_unlock)
    }

    /// Number of nodes at level 1 or above.
    pub fn total_unlocked(&self, levels: &UnlockedLevels) -> usize {
        self.nodes
            .iter()
            .filter(|n| level_of(levels, n.id) > 0)
            .count()
    }

    /// Whether every node is at its max level.
    pub fn all_maxed(&self, levels: &UnlockedLevels) -> bool {
        self.nodes
            .iter()
            .all(|n| n.is_maxed(level_of(levels, n.id)))
    }

    /// Whether static and dynamic prerequisites of `node` are satisfied.
    pub fn prerequisites_met(&self, node: &ProgressionNode, levels: &UnlockedLevels) -> bool {
        let statics = node.prerequisites.iter().all(|p| {
            self.by_key
                .get(&p.node_key)
                .is_some_and(|&id| level_of(levels, id) >= p.level)
        });
        statics
            && node
                .dynamic_prerequisites
                .iter()
                .all(|d| self.dynamic_met(d, levels))
    }

    fn dynamic_met(&self, prereq: &DynamicPrerequisite, levels: &UnlockedLevels) -> bool {
        match *prereq {
            DynamicPrerequisite::TotalNodesUnlocked { count } => {
                self.total_unlocked(levels) >= count as usize
            }
            DynamicPrerequisite::NodesUnlockedBelowTier { tier, count } => {
                let unlocked = self
                    .nodes
                    .iter()
                    .filter(|n| n.tier < tier && level_of(levels, n.id) > 0)
                    .count();
                unlocked >= count as usize
            }
        }
    }

    /// Whether `node` can be a vote candidate or unlock target.
    pub fn is_eligible(&self, node: &ProgressionNode, levels: &UnlockedLevels) -> bool {
        !node.is_maxed(level_of(levels, node.id)) && self.prerequisites_met(node, levels)
    }

    /// All eligible nodes in catalog order.
    pub fn eligible_nodes(&self, levels: &UnlockedLevels) -> Vec<&ProgressionNode> {
        self.nodes
            .iter()
            .filter(|n| self.is_eligible(n, levels))
            .collect()
    }

    /// Nodes with their unlock status, in catalog order.
    pub fn tree(&self, levels: &UnlockedLevels) -> Vec<TreeNode> {
        self.nodes
            .iter()
            .map(|node| {
                let unlocked_level = level_of(levels, node.id);
                TreeNode {
                    node: node.clone(),
                    unlocked_level,
                    is_unlocked: unlocked_level > 0,
                    children: self.children(node.id).to_vec(),
                }
            })
            .collect()
    }

    /// Whether every node gating `feature_key` is at its required level.
    ///
    /// Ungated features are unlocked.
    pub fn is_feature_unlocked(&self, feature_key: &str, levels: &UnlockedLevels) -> bool {
        self.gating_nodes(feature_key)
            .iter()
            .all(|&(id, level)| level_of(levels, id) >= level)
    }

    /// Nodes that must still unlock before `feature_key` opens.
    ///
    /// Starts from every gating node below its required level and follows
    /// unmet static prerequisites transitively. Deduplicated, catalog order.
    pub fn required_nodes(
        &self,
        feature_key: &str,
        levels: &UnlockedLevels,
    ) -> Vec<&ProgressionNode> {
        let mut stack: Vec<NodeId> = self
            .gating_nodes(feature_key)
            .iter()
            .filter(|&&(id, level)| level_of(levels, id) < level)
            .map(|&(id, _)| id)
            .collect();

        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.get_node(id) else {
                continue;
            };
            for prereq in &node.prerequisites {
                if let Some(&parent) = self.by_key.get(&prereq.node_key) {
                    if level_of(levels, parent) < prereq.level && !seen.contains(&parent) {
                        stack.push(parent);
                    }
                }
            }
        }

        let mut required: Vec<NodeId> = seen.into_iter().collect();
        required.sort_unstable();
        required
            .into_iter()
            .filter_map(|id| self.get_node(id))
            .collect()
    }

    /// Whether the `item_<name>` node is unlocked. Items without a node are locked.
    pub fn is_item_unlocked(&self, item_name: &str, levels: &UnlockedLevels) -> bool {
        self.get_by_key(&item_node_key(item_name))
            .is_some_and(|node| level_of(levels, node.id) >= 1)
    }

    /// Every modifier for `feature_key` with its node's level, catalog order.
    pub fn modifiers_for(&self, feature_key: &str, levels: &UnlockedLevels) -> Vec<ActiveModifier> {
        self.modifiers
            .get(feature_key)
            .into_iter()
            .flatten()
            .filter_map(|&id| {
                let node = self.get_node(id)?;
                Some(ActiveModifier {
                    node_id: id,
                    node_key: node.key.clone(),
                    level: level_of(levels, id),
                    config: node.modifier.clone()?,
                })
            })
            .collect()
    }

    /// `base` with every modifier for `feature_key` stacked on top.
    ///
    /// Unmodified values come back unchanged.
    pub fn modified_value(&self, feature_key: &str, base: f64, levels: &UnlockedLevels) -> f64 {
        let Some(ids) = self.modifiers.get(feature_key) else {
            return base;
        };
        ids.iter()
            .filter_map(|&id| self.get_node(id))
            .fold(base, |value, node| match &node.modifier {
                Some(modifier) => modifier.apply(value, level_of(levels, node.id)),
                None => value,
            })
    }

    /// Depth-first search over prerequisite edges with three-colour marking.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit(
            catalog: &Catalog,
            index: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Result<()> {
            match marks[index] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    let start = path.iter().position(|&i| i == index).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|&i| catalog.nodes[i].key.clone())
                        .collect();
                    cycle.push(catalog.nodes[index].key.clone());
                    return Err(TreeError::Cycle(cycle));
                }
                Mark::Unvisited => {}
            }

            marks[index] = Mark::Visiting;
            path.push(index);
            for prereq in &catalog.nodes[index].prerequisites {
                if let Some(&parent) = catalog.by_key.get(&prereq.node_key) {
                    visit(catalog, parent.0 as usize - 1, marks, path)?;
                }
            }
            path.pop();
            marks[index] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path = Vec::new();
        for index in 0..self.nodes.len() {
            visit(self, index, &mut marks, &mut path)?;
        }
        Ok(())
    }
}

fn validate_node(node: &ProgressionNode) -> Result<()> {
    let invalid = |reason: String| TreeError::InvalidNode {
        key: node.key.clone(),
        reason,
    };

    if node.name.trim().is_empty() {
        return Err(invalid("name is empty".into()));
    }
    if node.max_level == 0 {
        return Err(invalid("max_level must be at least 1".into()));
    }
    crate::cost::validate_costs(&node.costs, node.max_level).map_err(|reason| {
        TreeError::InvalidCosts {
            key: node.key.clone(),
            reason,
        }
    })?;
    for feature in &node.features {
        if feature.key.is_empty() {
            return Err(invalid("gated feature with empty key".into()));
        }
        if feature.level == 0 || feature.level > node.max_level {
            return Err(invalid(format!(
                "feature '{}' gated at level {} outside 1..={}",
                feature.key, feature.level, node.max_level
            )));
        }
    }
    if let Some(modifier) = &node.modifier {
        modifier.validate().map_err(invalid)?;
    }
    if node.prerequisites.iter().any(|p| p.node_key == node.key) {
        return Err(TreeError::Cycle(vec![node.key.clone(), node.key.clone()]));
    }
    Ok(())
}
