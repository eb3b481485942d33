//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the differencing engine:
//! - Plan node identifiers (`NodeId`)
//! - The closed set of operations a node can require (`OperationType`)
//! - Error types (`GraftError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module implement `Ord` so they can key `BTreeMap`s and
//! `BTreeSet`s, keeping plan output stable across runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// PLAN IDENTIFIERS
// =============================================================================

/// Index of a node inside an [`UpsertPlan`](crate::plan::UpsertPlan).
///
/// Nodes are stored in a flat arena; parent and child links are expressed as
/// `NodeId`s rather than references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Position of the node in the plan arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// OPERATION TYPE
// =============================================================================

/// The treatment a single entity instance requires.
///
/// A node may carry more than one operation, e.g. `[Relate, Patch]` when a
/// relate target also needs its own properties written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    /// Create the entity.
    Insert,
    /// Overwrite every own property of the entity.
    Update,
    /// Write only the changed properties.
    Patch,
    /// Attach an existing entity to the parent.
    Relate,
    /// Detach the entity from the parent without deleting it.
    Unrelate,
    /// Remove the entity.
    Delete,
    /// Run a nested plan rooted at this entity.
    UpsertRecursively,
    /// Nothing to do at this node.
    None,
}

impl OperationType {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Insert,
        Self::Update,
        Self::Patch,
        Self::Relate,
        Self::Unrelate,
        Self::Delete,
        Self::UpsertRecursively,
        Self::None,
    ];

    /// Stable lowercase name used in logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Relate => "relate",
            Self::Unrelate => "unrelate",
            Self::Delete => "delete",
            Self::UpsertRecursively => "upsertRecursively",
            Self::None => "none",
        }
    }

    /// Whether the operation writes own properties of an existing row.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Update | Self::Patch)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while planning an upsert.
///
/// - No silent failures, no partial plans
/// - Use `Result<T, GraftError>` for fallible operations
/// - Every error is fatal to the invocation that raised it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraftError {
    /// The combined desired + current relation expression exceeds the allow-list.
    #[error("Unallowed relation in graph: {expression}")]
    UnallowedRelation {
        /// The offending relation expression.
        expression: String,
    },

    /// A desired instance names an identity that does not exist under its parent.
    #[error(
        "{child} is not a child of {}. Use the `relate` option to relate it or the `insertMissing` option to insert it with an explicit id",
        describe_parent(.parent)
    )]
    AmbiguousIdentity {
        /// Description of the parent instance, `None` for graph roots.
        parent: Option<String>,
        /// Description of the offending child instance.
        child: String,
    },

    /// A node about to be related carries nested relations of its own.
    #[error(
        "{identity} is related without changes of its own but has nested relations; upserting the children of a related node is not supported"
    )]
    UnsupportedNestedUpsert {
        /// Description of the offending instance.
        identity: String,
    },

    /// Identifier extraction met a malformed composite key.
    #[error("Invalid identity for model {model}: {reason}")]
    InvalidCompositeIdentity {
        /// Model whose identifier was malformed.
        model: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested model is not registered.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The graph names a relation the model does not declare.
    #[error("Unknown relation {relation} on model {model}")]
    UnknownRelation {
        /// Model the relation was looked up on.
        model: String,
        /// Relation name that was not found.
        relation: String,
    },

    /// A relation provider re-entered its own resolution.
    #[error("Circular relation mapping while resolving model {0}")]
    CircularRelationMapping(String),

    /// A model schema is inconsistent.
    #[error("Invalid schema for model {model}: {reason}")]
    InvalidSchema {
        /// Model whose schema is invalid.
        model: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The graph has the wrong shape for its schema.
    #[error("Invalid graph at '{path}': {reason}")]
    InvalidGraph {
        /// Relation path where the problem was found.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Two desired instances in one relation share an identity.
    #[error("Duplicate identity {identity} at '{path}'")]
    DuplicateIdentity {
        /// Relation path of the collection.
        path: String,
        /// The repeated identity.
        identity: String,
    },

    /// A relation expression string could not be parsed.
    #[error("Invalid relation expression '{input}': {reason}")]
    InvalidExpression {
        /// The expression text.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested plan node does not exist.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
}

fn describe_parent(parent: &Option<String>) -> String {
    match parent {
        Some(p) => p.clone(),
        None => "any parent (it is a root of the graph)".to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
