//! # Upsert Planning
//!
//! Entry point of the engine. An [`UpsertPlanner`] answers two questions:
//!
//! 1. Which persisted state must be loaded to diff this graph?
//!    ([`UpsertPlanner::fetch_request`])
//! 2. Given that state, what must happen to every entity?
//!    ([`UpsertPlanner::plan`])
//!
//! The resulting [`UpsertPlan`] owns the classified nodes and derives the
//! order in which executors apply them.

use crate::builder::GraphBuilder;
use crate::change::ForeignKeyValue;
use crate::expression::{RelationExpression, instances, join_path, related_instances};
use crate::identity::IdentityKey;
use crate::node::GraphNode;
use crate::options::{OptionsIndex, UpsertOptions};
use crate::schema::{ModelSchema, Relation, SchemaRegistry};
use crate::value::{Properties, is_internal_property};
use crate::{GraftError, NodeId, OperationType};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

// =============================================================================
// FETCH REQUEST
// =============================================================================

/// What a loader must read before planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    /// Root model.
    pub model: String,
    /// Identities of the desired roots that carry one.
    pub roots: Vec<IdentityKey>,
    /// Relations to load alongside the roots.
    #[serde(serialize_with = "as_string")]
    pub expression: RelationExpression,
    /// Columns to select per relation path (`""` for the roots).
    pub columns: BTreeMap<String, BTreeSet<String>>,
}

fn as_string<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

// =============================================================================
// PLANNER
// =============================================================================

/// Plans upserts of graphs rooted at one model.
#[derive(Debug, Clone)]
pub struct UpsertPlanner<'a> {
    registry: &'a SchemaRegistry,
    model: &'a ModelSchema,
    options: UpsertOptions,
    index: OptionsIndex,
    allowed: Option<RelationExpression>,
}

impl<'a> UpsertPlanner<'a> {
    /// Planner for graphs whose roots are `model` instances.
    pub fn new(registry: &'a SchemaRegistry, model: &str) -> Result<Self, GraftError> {
        Ok(Self {
            registry,
            model: registry.model(model)?,
            options: UpsertOptions::new(),
            index: OptionsIndex::default(),
            allowed: None,
        })
    }

    /// Use `options` for every run of this planner.
    #[must_use]
    pub fn with_options(mut self, options: UpsertOptions) -> Self {
        self.index = OptionsIndex::new(&options);
        self.options = options;
        self
    }

    /// Restrict graphs to the relations in `allowed`.
    #[must_use]
    pub fn allow(mut self, allowed: RelationExpression) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Root model of the planner.
    #[must_use]
    pub fn model(&self) -> &ModelSchema {
        self.model
    }

    /// Options of the planner.
    #[must_use]
    pub fn options(&self) -> &UpsertOptions {
        &self.options
    }

    fn check_allowed(&self, expression: &RelationExpression) -> Result<(), GraftError> {
        match &self.allowed {
            Some(allowed) if !expression.is_subset_of(allowed) => {
                Err(GraftError::UnallowedRelation {
                    expression: expression.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Describe the persisted state needed to plan `desired`.
    pub fn fetch_request(&self, desired: &Value) -> Result<FetchRequest, GraftError> {
        let expression = RelationExpression::from_graph(self.registry, self.model.name(), desired)?;
        self.check_allowed(&expression)?;

        let keyer = self.model.keyer();
        let mut roots = Vec::new();
        let items = instances(desired, "")?;
        for instance in &items {
            if let Some(key) = keyer.key(instance)? {
                roots.push(key);
            }
        }

        let mut columns = BTreeMap::new();
        collect_columns(self.registry, self.model, &items, "", None, &mut columns)?;

        tracing::debug!(
            model = self.model.name(),
            roots = roots.len(),
            expression = %expression,
            "built fetch request"
        );

        Ok(FetchRequest {
            model: self.model.name().to_string(),
            roots,
            expression,
            columns,
        })
    }

    /// Classify every instance of `desired` against `current`.
    ///
    /// `current` is the persisted state loaded for the desired roots, with
    /// the relations named by [`fetch_request`](Self::fetch_request).
    pub fn plan(&self, desired: &Value, current: &Value) -> Result<UpsertPlan, GraftError> {
        let mut expression =
            RelationExpression::from_graph(self.registry, self.model.name(), desired)?;
        expression.merge(&RelationExpression::from_graph(
            self.registry,
            self.model.name(),
            current,
        )?);
        self.check_allowed(&expression)?;

        let nodes =
            GraphBuilder::new(self.registry, &self.index).build(self.model.name(), desired, current)?;
        let plan = UpsertPlan {
            model: self.model.name().to_string(),
            nodes,
        };

        tracing::debug!(
            model = self.model.name(),
            nodes = plan.len(),
            summary = ?plan.summary(),
            "planned upsert"
        );
        Ok(plan)
    }

    /// Planner and graph for the nested run a node defers.
    ///
    /// Returns `None` unless the node carries
    /// [`OperationType::UpsertRecursively`]. The nested planner is rooted at
    /// the node's model, with options and allow-list rebased to its path.
    pub fn nested(
        &self,
        plan: &UpsertPlan,
        node: NodeId,
    ) -> Result<Option<NestedUpsert<'a>>, GraftError> {
        let node = plan.node(node)?;
        if !node.has(OperationType::UpsertRecursively) {
            return Ok(None);
        }
        let Some(desired) = node.desired() else {
            return Ok(None);
        };

        let path = node.relation_path();
        let mut planner =
            UpsertPlanner::new(self.registry, node.model())?.with_options(self.options.rebase(path));
        if let Some(allowed) = &self.allowed {
            planner = planner.allow(allowed.below(path));
        }
        Ok(Some(NestedUpsert {
            planner,
            desired: Value::Object(desired.clone()),
        }))
    }
}

/// A nested run deferred by an `UpsertRecursively` node.
#[derive(Debug, Clone)]
pub struct NestedUpsert<'a> {
    /// Planner rooted at the node's model.
    pub planner: UpsertPlanner<'a>,
    /// The node's desired subtree.
    pub desired: Value,
}

fn collect_columns(
    registry: &SchemaRegistry,
    model: &ModelSchema,
    items: &[&Properties],
    path: &str,
    reaching: Option<&Relation>,
    out: &mut BTreeMap<String, BTreeSet<String>>,
) -> Result<(), GraftError> {
    let relations = model.relations(registry)?;
    let mut nested: BTreeMap<&str, Vec<&Properties>> = BTreeMap::new();

    let columns = out.entry(path.to_string()).or_default();
    columns.extend(model.id_properties().iter().cloned());
    if let Some(relation) = reaching {
        columns.extend(relation.related_properties.iter().cloned());
    }
    for instance in items {
        for (key, value) in instance.iter() {
            if let Some(relation) = relations.get(key) {
                columns.extend(relation.owner_properties.iter().cloned());
                let child_path = join_path(path, key);
                nested
                    .entry(key.as_str())
                    .or_default()
                    .extend(related_instances(relation, value, &child_path)?);
            } else if !is_internal_property(key) {
                columns.insert(key.clone());
            }
        }
    }

    for (name, children) in nested {
        let Some(relation) = relations.get(name) else {
            continue;
        };
        let related = registry.model(&relation.related_model)?;
        let child_path = join_path(path, name);
        collect_columns(registry, related, &children, &child_path, Some(relation), out)?;
    }
    Ok(())
}

// =============================================================================
// PLAN
// =============================================================================

/// One operation of one node, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    /// Node the operation applies to.
    pub node: NodeId,
    /// The operation.
    pub operation: OperationType,
}

/// The classified graph produced by one planning run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertPlan {
    model: String,
    nodes: Vec<GraphNode>,
}

impl UpsertPlan {
    /// Root model of the plan.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// All nodes, parents before children.
    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the plan has no nodes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Result<&GraphNode, GraftError> {
        self.nodes.get(id.index()).ok_or(GraftError::NodeNotFound(id))
    }

    /// Parent of a node, `None` for roots.
    pub fn parent(&self, id: NodeId) -> Result<Option<&GraphNode>, GraftError> {
        match self.node(id)?.parent() {
            Some(parent) => self.node(parent).map(Some),
            None => Ok(None),
        }
    }

    /// Root nodes, in desired order.
    pub fn roots(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.parent().is_none())
    }

    /// Nodes requiring `operation`.
    pub fn nodes_with(&self, operation: OperationType) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.has(operation))
    }

    /// Whether applying the plan changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.nodes.iter().all(GraphNode::is_noop)
    }

    /// Node count per operation.
    #[must_use]
    pub fn summary(&self) -> BTreeMap<OperationType, usize> {
        let mut counts = BTreeMap::new();
        for op in self.nodes.iter().flat_map(|n| n.operations()) {
            *counts.entry(*op).or_insert(0) += 1;
        }
        counts
    }

    // =========================================================================
    // ORDERING
    // =========================================================================

    /// Every operation of the plan in the order executors apply them.
    ///
    /// 1. Delete and Unrelate, deepest nodes first
    /// 2. Insert, belongs-to-one targets before the rows that reference
    ///    them, otherwise parents before children
    /// 3. Relate, then Update and Patch, parents before children
    /// 4. Delete of belongs-to-one targets, shallowest first, once the
    ///    rows referencing them point elsewhere
    /// 5. UpsertRecursively
    #[must_use]
    pub fn steps(&self) -> Vec<PlannedStep> {
        let mut steps = Vec::new();

        let (mut late, mut removals): (Vec<(usize, &GraphNode)>, Vec<_>) = self
            .nodes
            .iter()
            .filter(|n| n.has(OperationType::Delete) || n.has(OperationType::Unrelate))
            .map(|n| (self.depth(n), n))
            .partition(|(_, n)| n.has(OperationType::Delete) && n.is_referenced_by_parent());
        removals.sort_by(|(da, a), (db, b)| db.cmp(da).then(a.id().cmp(&b.id())));
        late.sort_by(|(da, a), (db, b)| da.cmp(db).then(a.id().cmp(&b.id())));
        Self::push_removals(&mut steps, &removals);

        let mut inserts = Vec::new();
        for root in self.roots() {
            self.insert_order(root, &mut inserts);
        }
        steps.extend(inserts.into_iter().map(|node| PlannedStep {
            node,
            operation: OperationType::Insert,
        }));

        for phase in [
            &[OperationType::Relate][..],
            &[OperationType::Update, OperationType::Patch],
        ] {
            self.push_phase(&mut steps, phase);
        }
        Self::push_removals(&mut steps, &late);
        self.push_phase(&mut steps, &[OperationType::UpsertRecursively]);
        steps
    }

    fn push_removals(steps: &mut Vec<PlannedStep>, removals: &[(usize, &GraphNode)]) {
        for (_, node) in removals {
            for op in node.operations() {
                steps.push(PlannedStep {
                    node: node.id(),
                    operation: *op,
                });
            }
        }
    }

    fn push_phase(&self, steps: &mut Vec<PlannedStep>, phase: &[OperationType]) {
        for node in &self.nodes {
            for op in node.operations().iter().filter(|op| phase.contains(op)) {
                steps.push(PlannedStep {
                    node: node.id(),
                    operation: *op,
                });
            }
        }
    }

    fn depth(&self, node: &GraphNode) -> usize {
        let mut depth = 0;
        let mut cursor = node.parent();
        while let Some(id) = cursor {
            depth += 1;
            cursor = self.nodes.get(id.index()).and_then(GraphNode::parent);
        }
        depth
    }

    fn insert_order(&self, node: &GraphNode, out: &mut Vec<NodeId>) {
        let children: Vec<&GraphNode> = node
            .children()
            .values()
            .flatten()
            .filter_map(|id| self.nodes.get(id.index()))
            .collect();

        for child in children.iter().filter(|c| c.is_referenced_by_parent()) {
            self.insert_order(child, out);
        }
        if node.has(OperationType::Insert) {
            out.push(node.id());
        }
        for child in children.iter().filter(|c| !c.is_referenced_by_parent()) {
            self.insert_order(child, out);
        }
    }

    // =========================================================================
    // PAYLOADS
    // =========================================================================

    /// Properties an Update or Patch of the node must write.
    ///
    /// Update writes every own property, Patch only the changed ones.
    /// Linking properties of a relate target are left out. Foreign keys
    /// driven by belongs-to-one children carry their new value; pending
    /// keys are absent until the child has been inserted. Empty for nodes
    /// that neither update nor patch.
    pub fn patch_payload(&self, id: NodeId) -> Result<Properties, GraftError> {
        let node = self.node(id)?;
        let mut payload = Properties::new();
        let Some(desired) = node.desired() else {
            return Ok(payload);
        };

        if node.has(OperationType::Update) {
            for (name, value) in desired {
                if !is_internal_property(name) && !node.omit_from_update().contains(name) {
                    payload.insert(name.clone(), value.clone());
                }
            }
        } else if node.has(OperationType::Patch) {
            for name in node.changed_properties() {
                if node.omit_from_update().contains(name) {
                    continue;
                }
                if let Some(value) = desired.get(name) {
                    payload.insert(name.clone(), value.clone());
                }
            }
        } else {
            return Ok(payload);
        }

        for (column, value) in node.relational_changes() {
            if let ForeignKeyValue::Known(value) = value {
                payload.insert(column.clone(), value.clone());
            }
        }
        Ok(payload)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionScope, UpsertOption};
    use crate::schema::Relation;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(ModelSchema::new("Person", ["id"]).with_relations(vec![
                Relation::has_many("pets", "Pet", "id", "ownerId"),
                Relation::belongs_to_one("parent", "Person", "parentId", "id"),
            ]))
            .with(ModelSchema::new("Pet", ["id"]))
    }

    #[test]
    fn fetch_request_lists_roots_relations_and_columns() {
        let registry = registry();
        let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
        let request = planner
            .fetch_request(&json!([
                {"id": 1, "name": "A", "pets": [{"name": "Rex", "$meta": 1}]},
                {"name": "new", "parent": {"id": 7}}
            ]))
            .expect("request");

        assert_eq!(request.roots.len(), 1);
        assert_eq!(request.expression.to_string(), "[parent, pets]");
        assert_eq!(
            request.columns.get(""),
            Some(&BTreeSet::from([
                "id".to_string(),
                "name".to_string(),
                "parentId".to_string()
            ]))
        );
        assert_eq!(
            request.columns.get("pets"),
            Some(&BTreeSet::from([
                "id".to_string(),
                "name".to_string(),
                "ownerId".to_string()
            ]))
        );
    }

    #[test]
    fn allow_list_is_checked_before_planning() {
        let registry = registry();
        let planner = UpsertPlanner::new(&registry, "Person")
            .expect("planner")
            .allow(RelationExpression::parse("pets").expect("parse"));

        let result = planner.plan(
            &json!({"id": 1, "parent": {"id": 5}}),
            &json!({"id": 1, "parent": {"id": 5}}),
        );
        assert!(matches!(result, Err(GraftError::UnallowedRelation { .. })));

        assert!(planner
            .plan(&json!({"id": 1, "pets": []}), &json!({"id": 1, "pets": []}))
            .is_ok());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let registry = registry();
        assert!(matches!(
            UpsertPlanner::new(&registry, "Vet"),
            Err(GraftError::UnknownModel(_))
        ));
    }

    #[test]
    fn steps_order_removals_before_writes() {
        let registry = registry();
        let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
        let plan = planner
            .plan(
                &json!({"id": 1, "name": "B", "pets": [{"name": "new"}]}),
                &json!({"id": 1, "name": "A", "pets": [{"id": 10}]}),
            )
            .expect("plan");

        let ops: Vec<OperationType> = plan.steps().iter().map(|s| s.operation).collect();
        assert_eq!(
            ops,
            vec![
                OperationType::Delete,
                OperationType::Insert,
                OperationType::Patch
            ]
        );
    }

    #[test]
    fn belongs_to_one_insert_precedes_owner() {
        let registry = registry();
        let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
        let plan = planner
            .plan(&json!({"name": "child", "parent": {"name": "mother"}}), &json!([]))
            .expect("plan");

        let steps = plan.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].node, NodeId(1));
        assert_eq!(steps[1].node, NodeId(0));
    }

    #[test]
    fn patch_payload_carries_changes_and_foreign_keys() {
        let registry = registry();
        let options = UpsertOptions::new().with(UpsertOption::Relate, OptionScope::paths(["parent"]));
        let planner = UpsertPlanner::new(&registry, "Person")
            .expect("planner")
            .with_options(options);
        let plan = planner
            .plan(
                &json!({"id": 1, "name": "B", "age": 3, "parent": {"id": 9}}),
                &json!({"id": 1, "name": "A", "age": 3, "parentId": 2, "parent": {"id": 2}}),
            )
            .expect("plan");

        let payload = plan.patch_payload(NodeId(0)).expect("payload");
        assert_eq!(payload.get("name"), Some(&json!("B")));
        assert_eq!(payload.get("parentId"), Some(&json!(9)));
        assert!(!payload.contains_key("age"));
        assert!(!payload.contains_key("parent"));

        assert!(plan.patch_payload(NodeId(1)).expect("payload").is_empty());
        assert!(matches!(
            plan.patch_payload(NodeId(9)),
            Err(GraftError::NodeNotFound(_))
        ));
    }

    #[test]
    fn summary_counts_operations() {
        let registry = registry();
        let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
        let plan = planner
            .plan(
                &json!({"id": 1, "pets": [{"name": "a"}, {"name": "b"}]}),
                &json!({"id": 1, "pets": []}),
            )
            .expect("plan");

        let summary = plan.summary();
        assert_eq!(summary.get(&OperationType::Insert), Some(&2));
        assert_eq!(summary.get(&OperationType::None), Some(&1));
        assert!(!plan.is_noop());
        assert_eq!(plan.roots().count(), 1);
        assert_eq!(plan.parent(NodeId(2)).expect("parent").map(GraphNode::id), Some(NodeId(0)));
    }
}
