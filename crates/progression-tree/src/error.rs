//! Error types for catalog loading and validation.

use thiserror::Error;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors raised while building a [`Catalog`](crate::Catalog).
///
/// All of these are configuration errors: they are detected when the tree is
/// loaded, never while serving queries.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The tree file has no nodes.
    #[error("progression tree has no nodes")]
    Empty,

    /// A node was declared with an empty key.
    #[error("node at index {0} has an empty key")]
    EmptyKey(usize),

    /// Two nodes share a key.
    #[error("duplicate node key: {0}")]
    DuplicateKey(String),

    /// A required node field is missing or invalid.
    #[error("node '{key}': {reason}")]
    InvalidNode { key: String, reason: String },

    /// A static prerequisite references a key that is not in the tree.
    #[error("node '{node}' references unknown prerequisite '{prerequisite}'")]
    MissingPrerequisite { node: String, prerequisite: String },

    /// A prerequisite string could not be parsed.
    #[error("invalid prerequisite '{0}': {1}")]
    InvalidPrerequisite(String, String),

    /// The per-level cost table is not non-decreasing or has the wrong length.
    #[error("node '{key}' has an invalid cost table: {reason}")]
    InvalidCosts { key: String, reason: String },

    /// The static prerequisite graph contains a cycle.
    #[error("cycle detected in progression tree: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Tree file could not be parsed.
    #[error("failed to parse tree config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Tree file could not be read.
    #[error("failed to read tree config: {0}")]
    Io(#[from] std::io::Error),
}
