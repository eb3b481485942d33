//! # Graph Builder
//!
//! Walks the desired graph and the persisted graph in lock-step and produces
//! the flat list of classified [`GraphNode`]s.
//!
//! ## Traversal Rules
//!
//! - Nodes are numbered in pre-order: a parent always precedes its children.
//! - Within one relation slot, desired-side nodes are built before
//!   current-only ones, so removal classification can see its siblings.
//! - A matched pair only walks relations its desired instance mentions.
//! - A deleted node is a leaf. Its persisted descendants are emitted as
//!   their own removal nodes, linked to it for path computation only.
//! - A matched owner's foreign keys follow its belongs-to-one children: a
//!   child that ends up doing nothing leaves the key as it is.

use crate::change::ChangeDetector;
use crate::expression::{instances, join_path, related_instances};
use crate::identity::IdentityKey;
use crate::node::GraphNode;
use crate::options::OptionsIndex;
use crate::policy::{Classification, PolicyContext, RelationPolicy};
use crate::schema::{ModelSchema, Relation, RelationKind, SchemaRegistry};
use crate::value::Properties;
use crate::{GraftError, NodeId, OperationType};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Immutable per-slot context threaded through the recursion.
#[derive(Clone, Copy)]
struct BuildContext<'c> {
    parent: Option<NodeId>,
    relation: Option<&'c Relation>,
    model: &'c ModelSchema,
    path: &'c str,
    /// Whether built nodes are listed in the parent's children.
    register: bool,
}

/// A persisted instance together with its identity.
type CurrentSide<'v> = (&'v Properties, Option<IdentityKey>);

/// Builds the classified node list for one planning run.
pub struct GraphBuilder<'a> {
    registry: &'a SchemaRegistry,
    options: &'a OptionsIndex,
    nodes: Vec<GraphNode>,
}

impl<'a> GraphBuilder<'a> {
    /// Create a builder for one run.
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry, options: &'a OptionsIndex) -> Self {
        Self {
            registry,
            options,
            nodes: Vec::new(),
        }
    }

    /// Classify every instance of the desired graph against persisted state.
    ///
    /// `desired` and `current` are a single root instance, an array of root
    /// instances or `null`. Persisted roots that the desired graph does not
    /// name are outside the request and produce no node.
    pub fn build(
        mut self,
        model: &str,
        desired: &Value,
        current: &Value,
    ) -> Result<Vec<GraphNode>, GraftError> {
        let registry = self.registry;
        let schema = registry.model(model)?;
        let desired_roots = instances(desired, "")?;
        let current_roots = instances(current, "")?;

        let ctx = BuildContext {
            parent: None,
            relation: None,
            model: schema,
            path: "",
            register: false,
        };
        self.build_slot(ctx, &desired_roots, &current_roots, false)?;
        Ok(self.nodes)
    }

    /// Match one relation slot (or the root set) and build its nodes.
    fn build_slot(
        &mut self,
        ctx: BuildContext<'_>,
        desired: &[&Properties],
        current: &[&Properties],
        removals: bool,
    ) -> Result<(), GraftError> {
        let keyer = ctx.model.keyer();

        let mut current_keys = Vec::with_capacity(current.len());
        let mut index: BTreeMap<IdentityKey, usize> = BTreeMap::new();
        for (i, instance) in current.iter().enumerate() {
            let key = keyer.key(instance)?;
            if let Some(k) = &key {
                index.entry(k.clone()).or_insert(i);
            }
            current_keys.push(key);
        }

        let mut matched = vec![false; current.len()];
        let mut seen = BTreeSet::new();
        let mut slot = Vec::with_capacity(desired.len().max(current.len()));

        for instance in desired {
            let key = keyer.key(instance)?;
            if let Some(k) = &key {
                if !seen.insert(k.clone()) {
                    return Err(GraftError::DuplicateIdentity {
                        path: ctx.path.to_string(),
                        identity: keyer.describe(instance),
                    });
                }
            }
            let hit = key.as_ref().and_then(|k| index.get(k).copied());
            let current_side = match hit {
                Some(i) => {
                    matched[i] = true;
                    Some((current[i], current_keys[i].clone()))
                }
                None => None,
            };
            let id = self.visit(ctx, Some(*instance), key, current_side, &slot)?;
            slot.push(id);
        }

        if removals {
            for (i, instance) in current.iter().enumerate() {
                if matched[i] {
                    continue;
                }
                let current_side = Some((*instance, current_keys[i].clone()));
                let id = self.visit(ctx, None, None, current_side, &slot)?;
                slot.push(id);
            }
        }
        Ok(())
    }

    /// Classify and record one node, then walk below it.
    fn visit(
        &mut self,
        ctx: BuildContext<'_>,
        desired: Option<&Properties>,
        desired_key: Option<IdentityKey>,
        current: Option<CurrentSide<'_>>,
        slot: &[NodeId],
    ) -> Result<NodeId, GraftError> {
        let registry = self.registry;
        let relations = ctx.model.relations(registry)?;
        let relation_names: BTreeSet<&str> = relations.keys().map(String::as_str).collect();
        let policy = PolicyContext {
            options: self.options,
            path: ctx.path,
            model: ctx.model,
            relation: ctx.relation,
            relation_names: &relation_names,
        };

        let classification = match (desired, &current) {
            (Some(d), None) if desired_key.is_none() => RelationPolicy::insert(&policy, d),
            (Some(d), None) => {
                let parent = ctx.parent.and_then(|p| self.describe(p));
                RelationPolicy::insert_with_id(&policy, d, parent)?
            }
            (None, Some(_)) => {
                let siblings: Vec<&GraphNode> = slot
                    .iter()
                    .filter_map(|id| self.nodes.get(id.index()))
                    .collect();
                RelationPolicy::removal(&policy, &siblings)
            }
            (Some(d), Some((c, _))) => {
                let relational = relations
                    .values()
                    .flat_map(|relation| ChangeDetector::foreign_key_changes(relation, d, c))
                    .collect();
                let change = ChangeDetector::detect(d, c, &relation_names, relational);
                RelationPolicy::matched(&policy, change)
            }
            (None, None) => {
                return Err(GraftError::InvalidGraph {
                    path: ctx.path.to_string(),
                    reason: "node has neither a desired nor a current instance".to_string(),
                });
            }
        };

        let id = self.record(ctx, desired, desired_key, current.as_ref(), &relation_names, &classification);

        if classification.descend {
            if let Some(d) = desired {
                let current_instance = current.as_ref().map(|(c, _)| *c);
                self.descend(id, ctx, relations, d, current_instance)?;
                if let Some((c, _)) = &current {
                    if !classification.relational.is_empty() {
                        self.settle(id, &policy, relations, d, c);
                    }
                }
            }
        } else if classification.operations == [OperationType::Delete] {
            if let Some((c, _)) = &current {
                self.cascade(id, ctx, relations, c)?;
            }
        }
        Ok(id)
    }

    fn record(
        &mut self,
        ctx: BuildContext<'_>,
        desired: Option<&Properties>,
        desired_key: Option<IdentityKey>,
        current: Option<&CurrentSide<'_>>,
        relation_names: &BTreeSet<&str>,
        classification: &Classification,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let recursive = classification
            .operations
            .contains(&OperationType::UpsertRecursively);
        let keep = |instance: &Properties| -> Properties {
            if recursive {
                instance.clone()
            } else {
                instance
                    .iter()
                    .filter(|(k, _)| !relation_names.contains(k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
        };

        tracing::debug!(
            node = %id,
            model = ctx.model.name(),
            path = ctx.path,
            operations = ?classification.operations,
            "classified node"
        );

        self.nodes.push(GraphNode {
            id,
            parent: ctx.parent,
            relation: ctx.relation.map(|r| r.name.clone()),
            referenced_by_parent: ctx
                .relation
                .is_some_and(|r| r.kind == RelationKind::BelongsToOne),
            model: ctx.model.name().to_string(),
            desired: desired.map(keep),
            current: current.map(|(c, _)| keep(*c)),
            desired_key,
            current_key: current.and_then(|(_, k)| k.clone()),
            relation_path: ctx.path.to_string(),
            children: BTreeMap::new(),
            operations: classification.operations.clone(),
            changed_properties: classification.changed.clone(),
            unchanged_properties: classification.unchanged.clone(),
            omit_from_update: classification.omit_from_update.clone(),
            relational_changes: classification.relational.clone(),
        });

        if ctx.register {
            if let (Some(parent), Some(relation)) = (ctx.parent, ctx.relation) {
                if let Some(node) = self.nodes.get_mut(parent.index()) {
                    node.children
                        .entry(relation.name.clone())
                        .or_default()
                        .push(id);
                }
            }
        }
        id
    }

    /// Reclassify a matched owner once its belongs-to-one children are built.
    ///
    /// A foreign key only changes when the child driving it does something:
    /// a suppressed insert or relate, or a removal blocked by options,
    /// leaves the owner pointing at the persisted target.
    fn settle(
        &mut self,
        id: NodeId,
        policy: &PolicyContext<'_>,
        relations: &BTreeMap<String, Relation>,
        desired: &Properties,
        current: &Properties,
    ) {
        let Some(owner) = self.nodes.get(id.index()) else {
            return;
        };

        let mut relational = BTreeMap::new();
        let mut kept = Vec::new();
        for relation in relations.values() {
            let changes = ChangeDetector::foreign_key_changes(relation, desired, current);
            if changes.is_empty() {
                continue;
            }
            if self.link_kept(owner, relation) {
                kept.push(relation.name.as_str());
            } else {
                relational.extend(changes);
            }
        }
        if kept.is_empty() {
            return;
        }

        let change = ChangeDetector::detect(desired, current, policy.relation_names, relational);
        let classification = RelationPolicy::matched(policy, change);
        tracing::debug!(
            node = %id,
            relations = ?kept,
            operations = ?classification.operations,
            "foreign key left in place"
        );

        if let Some(node) = self.nodes.get_mut(id.index()) {
            node.operations = classification.operations;
            node.changed_properties = classification.changed;
            node.unchanged_properties = classification.unchanged;
            node.relational_changes = classification.relational;
        }
    }

    /// Whether the belongs-to-one slot under `owner` leaves its link as is.
    fn link_kept(&self, owner: &GraphNode, relation: &Relation) -> bool {
        let slot: Vec<&GraphNode> = owner
            .children_of(&relation.name)
            .iter()
            .filter_map(|child| self.nodes.get(child.index()))
            .collect();

        match slot.iter().find(|n| n.desired().is_some()) {
            Some(target) => target.current().is_none() && target.is_noop(),
            None => !slot.is_empty() && slot.iter().all(|n| n.is_noop()),
        }
    }

    /// Walk every relation the desired instance mentions.
    fn descend(
        &mut self,
        id: NodeId,
        ctx: BuildContext<'_>,
        relations: &BTreeMap<String, Relation>,
        desired: &Properties,
        current: Option<&Properties>,
    ) -> Result<(), GraftError> {
        let registry = self.registry;
        for (name, relation) in relations {
            let Some(desired_value) = desired.get(name) else {
                continue;
            };
            let path = join_path(ctx.path, name);
            tracing::trace!(path = %path, kind = %relation.kind, "visiting relation");

            let current_value = current.and_then(|c| c.get(name));
            let desired_items = related_instances(relation, desired_value, &path)?;
            let current_items = match current_value {
                Some(value) => related_instances(relation, value, &path)?,
                None => Vec::new(),
            };

            let child = BuildContext {
                parent: Some(id),
                relation: Some(relation),
                model: registry.model(&relation.related_model)?,
                path: &path,
                register: true,
            };
            self.build_slot(child, &desired_items, &current_items, true)?;
        }
        Ok(())
    }

    /// Emit removal nodes for the persisted descendants of a deleted node.
    fn cascade(
        &mut self,
        id: NodeId,
        ctx: BuildContext<'_>,
        relations: &BTreeMap<String, Relation>,
        current: &Properties,
    ) -> Result<(), GraftError> {
        let registry = self.registry;
        for (name, relation) in relations {
            let Some(value) = current.get(name) else {
                continue;
            };
            let path = join_path(ctx.path, name);
            let items = related_instances(relation, value, &path)?;
            if items.is_empty() {
                continue;
            }

            let child = BuildContext {
                parent: Some(id),
                relation: Some(relation),
                model: registry.model(&relation.related_model)?,
                path: &path,
                register: false,
            };
            self.build_slot(child, &[], &items, true)?;
        }
        Ok(())
    }

    /// Description of an already-built node for error messages.
    fn describe(&self, id: NodeId) -> Option<String> {
        let node = self.nodes.get(id.index())?;
        let schema = self.registry.model(&node.model).ok()?;
        let instance = node.current.as_ref().or(node.desired.as_ref())?;
        Some(schema.keyer().describe(instance))
    }
}

// =============================================================================
// TESTS
// =============================================================================
