//! # Relation Policy
//!
//! Classification rules for a single node, evaluated by situation:
//!
//! | Situation        | desired | current | desired identity |
//! |------------------|---------|---------|------------------|
//! | Insert           | yes     | no      | no               |
//! | InsertWithId     | yes     | no      | yes              |
//! | DeleteOrUnrelate | no      | yes     | -                |
//! | MatchedPair      | yes     | yes     | -                |
//!
//! Relation kinds matter in two places: the belongs-to-one unrelate
//! collapse, and the linking properties used when a relate target also
//! carries data of its own.

use crate::change::{ChangeKind, ChangeSet, ForeignKeyValue};
use crate::node::GraphNode;
use crate::options::{OptionsIndex, UpsertOption};
use crate::schema::{ModelSchema, Relation, RelationKind};
use crate::value::{Properties, is_internal_property};
use crate::{GraftError, OperationType};
use std::collections::{BTreeMap, BTreeSet};

/// Everything the policy needs to know about the node being classified.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Options of the run.
    pub options: &'a OptionsIndex,
    /// Relation path of the node.
    pub path: &'a str,
    /// Model of the node.
    pub model: &'a ModelSchema,
    /// Relation from the parent, `None` for roots.
    pub relation: Option<&'a Relation>,
    /// Relation property names declared on the node's model.
    pub relation_names: &'a BTreeSet<&'a str>,
}

impl PolicyContext<'_> {
    fn active(&self, option: UpsertOption) -> bool {
        self.options.is_active(option, self.path)
    }

    fn write_operation(&self) -> OperationType {
        if self.active(UpsertOption::Update) {
            OperationType::Update
        } else {
            OperationType::Patch
        }
    }

    /// Own data properties of an instance: not relations, not internal.
    fn own_properties(&self, instance: &Properties) -> BTreeSet<String> {
        instance
            .keys()
            .filter(|k| !self.relation_names.contains(k.as_str()) && !is_internal_property(k))
            .cloned()
            .collect()
    }

    fn has_nested_relations(&self, instance: &Properties) -> bool {
        instance
            .keys()
            .any(|k| self.relation_names.contains(k.as_str()))
    }
}

/// Result of classifying one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Operations, never empty.
    pub operations: Vec<OperationType>,
    /// Properties a write must carry.
    pub changed: BTreeSet<String>,
    /// Properties already matching persisted state.
    pub unchanged: BTreeSet<String>,
    /// Linking properties kept out of a secondary write.
    pub omit_from_update: BTreeSet<String>,
    /// Foreign keys driven by belongs-to-one children.
    pub relational: BTreeMap<String, ForeignKeyValue>,
    /// Whether the node's desired relations are walked in this pass.
    pub descend: bool,
}

impl Classification {
    fn only(operation: OperationType, descend: bool) -> Self {
        Self {
            operations: vec![operation],
            changed: BTreeSet::new(),
            unchanged: BTreeSet::new(),
            omit_from_update: BTreeSet::new(),
            relational: BTreeMap::new(),
            descend,
        }
    }
}

/// Relation-aware classification rules.
pub struct RelationPolicy;

impl RelationPolicy {
    /// Desired instance without identity and without a persisted match.
    #[must_use]
    pub fn insert(ctx: &PolicyContext<'_>, desired: &Properties) -> Classification {
        if ctx.active(UpsertOption::NoInsert) {
            return Classification::only(OperationType::None, false);
        }
        Classification {
            changed: ctx.own_properties(desired),
            ..Classification::only(OperationType::Insert, true)
        }
    }

    /// Desired instance naming an identity that does not exist under its parent.
    pub fn insert_with_id(
        ctx: &PolicyContext<'_>,
        desired: &Properties,
        parent: Option<String>,
    ) -> Result<Classification, GraftError> {
        if let Some(relation) = ctx.relation {
            if ctx.active(UpsertOption::Relate) {
                return Self::relate(ctx, relation, desired);
            }
        }
        if ctx.active(UpsertOption::InsertMissing) {
            return Ok(Self::insert(ctx, desired));
        }
        Err(GraftError::AmbiguousIdentity {
            parent,
            child: ctx.model.keyer().describe(desired),
        })
    }

    /// Properties that only express the link to the parent.
    #[must_use]
    pub fn linking_properties(model: &ModelSchema, relation: &Relation) -> BTreeSet<String> {
        model
            .id_properties()
            .iter()
            .chain(&relation.related_properties)
            .cloned()
            .chain(relation.join_columns().into_iter().map(str::to_string))
            .collect()
    }

    fn relate(
        ctx: &PolicyContext<'_>,
        relation: &Relation,
        desired: &Properties,
    ) -> Result<Classification, GraftError> {
        if ctx.active(UpsertOption::NoRelate) {
            return Ok(Classification::only(OperationType::None, false));
        }

        let linking = Self::linking_properties(ctx.model, relation);
        let additional: BTreeSet<String> = ctx
            .own_properties(desired)
            .into_iter()
            .filter(|p| !linking.contains(p))
            .collect();
        let nested = ctx.has_nested_relations(desired);

        if additional.is_empty() {
            if nested {
                return Err(GraftError::UnsupportedNestedUpsert {
                    identity: ctx.model.keyer().describe(desired),
                });
            }
            return Ok(Classification::only(OperationType::Relate, false));
        }

        let secondary = if nested {
            Some(OperationType::UpsertRecursively)
        } else if ctx.active(UpsertOption::NoUpdate) {
            None
        } else {
            Some(ctx.write_operation())
        };

        Ok(Classification {
            operations: std::iter::once(OperationType::Relate)
                .chain(secondary)
                .collect(),
            changed: additional,
            omit_from_update: linking,
            ..Classification::only(OperationType::Relate, false)
        })
    }

    /// Persisted instance that the desired graph no longer contains.
    ///
    /// `siblings` are the nodes already built for the same relation slot.
    /// On a belongs-to-one slot the persisted target stays when its
    /// replacement is related or inserted under `unrelate`, and when the
    /// replacement itself was suppressed, since the owner keeps its key.
    #[must_use]
    pub fn removal(ctx: &PolicyContext<'_>, siblings: &[&GraphNode]) -> Classification {
        let operation = if ctx.active(UpsertOption::Unrelate) {
            if ctx.active(UpsertOption::NoUnrelate) {
                OperationType::None
            } else {
                OperationType::Unrelate
            }
        } else if ctx.active(UpsertOption::NoDelete) {
            OperationType::None
        } else {
            OperationType::Delete
        };

        let replaced = siblings
            .iter()
            .any(|s| s.has(OperationType::Relate) || s.has(OperationType::Insert));
        let suppressed = siblings
            .iter()
            .any(|s| s.desired().is_some() && s.current().is_none() && s.is_noop());
        let belongs_to_one = ctx
            .relation
            .is_some_and(|r| r.kind == RelationKind::BelongsToOne);
        let collapsed = belongs_to_one
            && ((operation == OperationType::Unrelate && replaced)
                || (operation != OperationType::None && suppressed));

        if collapsed {
            Classification::only(OperationType::None, false)
        } else {
            Classification::only(operation, false)
        }
    }

    /// Desired instance matched with its persisted counterpart.
    #[must_use]
    pub fn matched(ctx: &PolicyContext<'_>, change: ChangeSet) -> Classification {
        let blocked = ctx.active(UpsertOption::NoUpdate);
        let relational_only: BTreeSet<String> = change.relational.keys().cloned().collect();

        let (operation, changed) = match change.kind() {
            ChangeKind::NoChanges => (OperationType::None, BTreeSet::new()),
            ChangeKind::HasOwnChanges if !blocked => (ctx.write_operation(), change.all_changed()),
            ChangeKind::HasOwnChanges if relational_only.is_empty() => {
                (OperationType::None, BTreeSet::new())
            }
            ChangeKind::HasOwnChanges | ChangeKind::HasRelationalChanges => {
                (OperationType::Patch, relational_only)
            }
        };

        Classification {
            operations: vec![operation],
            changed,
            unchanged: change.unchanged,
            omit_from_update: BTreeSet::new(),
            relational: change.relational,
            descend: true,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
