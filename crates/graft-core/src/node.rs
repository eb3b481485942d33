//! # Plan Nodes
//!
//! A `GraphNode` records the treatment one entity instance requires. Nodes
//! are transient plan artifacts: built once per planning run, immutable once
//! classified, and discarded after the executors consume them.

use crate::change::ForeignKeyValue;
use crate::identity::IdentityKey;
use crate::value::Properties;
use crate::{NodeId, OperationType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One classified entity instance.
///
/// Invariant: `desired` and `current` are never both absent, and
/// `operations` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) relation: Option<String>,
    pub(crate) referenced_by_parent: bool,
    pub(crate) model: String,
    pub(crate) desired: Option<Properties>,
    pub(crate) current: Option<Properties>,
    pub(crate) desired_key: Option<IdentityKey>,
    pub(crate) current_key: Option<IdentityKey>,
    pub(crate) relation_path: String,
    pub(crate) children: BTreeMap<String, Vec<NodeId>>,
    pub(crate) operations: Vec<OperationType>,
    pub(crate) changed_properties: BTreeSet<String>,
    pub(crate) unchanged_properties: BTreeSet<String>,
    pub(crate) omit_from_update: BTreeSet<String>,
    pub(crate) relational_changes: BTreeMap<String, ForeignKeyValue>,
}

impl GraphNode {
    /// Position of the node in the plan.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The owning node, `None` for roots.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Relation through which the node is reached from its parent.
    #[must_use]
    pub fn relation(&self) -> Option<&str> {
        self.relation.as_deref()
    }

    /// Whether the parent row holds a foreign key to this node.
    ///
    /// True for belongs-to-one children, which must be inserted before the
    /// parent that references them.
    #[must_use]
    pub fn is_referenced_by_parent(&self) -> bool {
        self.referenced_by_parent
    }

    /// Model class of the instance.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Instance from the desired graph.
    #[must_use]
    pub fn desired(&self) -> Option<&Properties> {
        self.desired.as_ref()
    }

    /// Matched instance from persisted state.
    #[must_use]
    pub fn current(&self) -> Option<&Properties> {
        self.current.as_ref()
    }

    /// Identity of the desired instance, if it has one.
    #[must_use]
    pub fn desired_key(&self) -> Option<&IdentityKey> {
        self.desired_key.as_ref()
    }

    /// Identity of the current instance.
    #[must_use]
    pub fn current_key(&self) -> Option<&IdentityKey> {
        self.current_key.as_ref()
    }

    /// The node's identity, preferring the persisted side.
    #[must_use]
    pub fn key(&self) -> Option<&IdentityKey> {
        self.current_key.as_ref().or(self.desired_key.as_ref())
    }

    /// Dotted relation names from the root; empty for roots.
    #[must_use]
    pub fn relation_path(&self) -> &str {
        &self.relation_path
    }

    /// Child nodes per relation, in build order.
    #[must_use]
    pub fn children(&self) -> &BTreeMap<String, Vec<NodeId>> {
        &self.children
    }

    /// Child nodes of one relation.
    #[must_use]
    pub fn children_of(&self, relation: &str) -> &[NodeId] {
        self.children.get(relation).map(Vec::as_slice).unwrap_or_default()
    }

    /// Operations required at this node, in execution order.
    #[must_use]
    pub fn operations(&self) -> &[OperationType] {
        &self.operations
    }

    /// Whether the node requires `operation`.
    #[must_use]
    pub fn has(&self, operation: OperationType) -> bool {
        self.operations.contains(&operation)
    }

    /// Whether nothing needs to happen at this node.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.operations.iter().all(|op| *op == OperationType::None)
    }

    /// Properties a patch or update must write.
    #[must_use]
    pub fn changed_properties(&self) -> &BTreeSet<String> {
        &self.changed_properties
    }

    /// Properties whose desired value already matches persisted state.
    #[must_use]
    pub fn unchanged_properties(&self) -> &BTreeSet<String> {
        &self.unchanged_properties
    }

    /// Linking properties excluded from a Relate node's secondary patch.
    #[must_use]
    pub fn omit_from_update(&self) -> &BTreeSet<String> {
        &self.omit_from_update
    }

    /// Foreign keys rewritten because a belongs-to-one child changed.
    #[must_use]
    pub fn relational_changes(&self) -> &BTreeMap<String, ForeignKeyValue> {
        &self.relational_changes
    }

    /// Whether the instance exists only in the desired graph.
    #[must_use]
    pub fn is_desired_only(&self) -> bool {
        self.current.is_none()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(operations: Vec<OperationType>) -> GraphNode {
        GraphNode {
            id: NodeId(3),
            parent: Some(NodeId(0)),
            relation: Some("pets".to_string()),
            referenced_by_parent: false,
            model: "Pet".to_string(),
            desired: json!({"id": 10, "name": "Rex"}).as_object().cloned(),
            current: None,
            desired_key: None,
            current_key: None,
            relation_path: "pets".to_string(),
            children: BTreeMap::from([("toys".to_string(), vec![NodeId(4)])]),
            operations,
            changed_properties: BTreeSet::new(),
            unchanged_properties: BTreeSet::new(),
            omit_from_update: BTreeSet::new(),
            relational_changes: BTreeMap::new(),
        }
    }

    #[test]
    fn noop_means_only_none() {
        assert!(node(vec![OperationType::None]).is_noop());
        assert!(!node(vec![OperationType::Relate, OperationType::Patch]).is_noop());
    }

    #[test]
    fn operation_lookup() {
        let n = node(vec![OperationType::Relate, OperationType::Patch]);
        assert!(n.has(OperationType::Patch));
        assert!(!n.has(OperationType::Insert));
    }

    #[test]
    fn children_of_missing_relation_is_empty() {
        let n = node(vec![OperationType::Insert]);
        assert_eq!(n.children_of("toys"), &[NodeId(4)]);
        assert!(n.children_of("vet").is_empty());
        assert!(n.is_desired_only());
        assert_eq!(n.key(), None);
    }
}
