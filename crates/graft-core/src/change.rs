//! # Change Detection
//!
//! Compares a desired instance with the persisted instance it was matched
//! to. Two kinds of change are tracked separately:
//!
//! - **own** changes: a plain property of the instance differs
//! - **relational** changes: a belongs-to-one child now points at a
//!   different entity, so the owner's foreign key must be rewritten even if
//!   nothing else changed

use crate::schema::{Relation, RelationKind};
use crate::value::{Properties, is_deferred, is_internal_property, loose_eq, loose_eq_opt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome class of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    /// Desired and current are equivalent.
    NoChanges,
    /// At least one own property differs.
    HasOwnChanges,
    /// Only foreign keys driven by belongs-to-one children differ.
    HasRelationalChanges,
}

/// New value of a foreign-key property driven by a belongs-to-one child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ForeignKeyValue {
    /// The value is known while planning.
    Known(Value),
    /// The child is inserted first; its key becomes the value.
    Pending {
        /// Relation whose inserted child supplies the value.
        relation: String,
    },
}

/// Detailed result of comparing one matched pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    /// Own properties whose desired value differs from the current one.
    pub own_changed: BTreeSet<String>,
    /// Own properties whose desired value equals the current one.
    pub unchanged: BTreeSet<String>,
    /// Foreign keys that must be rewritten, with their new values.
    pub relational: BTreeMap<String, ForeignKeyValue>,
}

impl ChangeSet {
    /// Classify the change set.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        if !self.own_changed.is_empty() {
            ChangeKind::HasOwnChanges
        } else if !self.relational.is_empty() {
            ChangeKind::HasRelationalChanges
        } else {
            ChangeKind::NoChanges
        }
    }

    /// Own and relational changes together.
    #[must_use]
    pub fn all_changed(&self) -> BTreeSet<String> {
        self.own_changed
            .iter()
            .cloned()
            .chain(self.relational.keys().cloned())
            .collect()
    }
}

/// Compares matched desired/current pairs.
pub struct ChangeDetector;

impl ChangeDetector {
    /// Compare own properties.
    ///
    /// `relation_names` are excluded from the own comparison;
    /// `relational` are the owner-side foreign keys already found to change
    /// (see [`foreign_key_changes`](Self::foreign_key_changes)).
    #[must_use]
    pub fn detect(
        desired: &Properties,
        current: &Properties,
        relation_names: &BTreeSet<&str>,
        relational: BTreeMap<String, ForeignKeyValue>,
    ) -> ChangeSet {
        let mut set = ChangeSet {
            relational,
            ..ChangeSet::default()
        };

        for (name, value) in desired {
            if relation_names.contains(name.as_str()) || is_internal_property(name) {
                continue;
            }
            let changed = is_deferred(value)
                || current
                    .get(name)
                    .is_none_or(|existing| !loose_eq(value, existing));
            if changed {
                set.own_changed.insert(name.clone());
            } else if !set.relational.contains_key(name) {
                set.unchanged.insert(name.clone());
            }
        }

        set
    }

    /// Owner foreign keys that change because a belongs-to-one child changed.
    ///
    /// Returns nothing for other relation kinds or when the desired instance
    /// does not mention the relation. The desired side's key comes from the
    /// desired child (null when the child is removed); the current side's
    /// from the current child, falling back to the owner's own columns.
    #[must_use]
    pub fn foreign_key_changes(
        relation: &Relation,
        desired_owner: &Properties,
        current_owner: &Properties,
    ) -> BTreeMap<String, ForeignKeyValue> {
        let mut changes = BTreeMap::new();
        if relation.kind != RelationKind::BelongsToOne {
            return changes;
        }
        let Some(desired_child) = desired_owner.get(&relation.name) else {
            return changes;
        };
        let desired_child = desired_child.as_object();
        let current_child = current_owner.get(&relation.name).and_then(Value::as_object);

        for (owner_prop, related_prop) in relation
            .owner_properties
            .iter()
            .zip(&relation.related_properties)
        {
            let desired_value = desired_child
                .and_then(|c| c.get(related_prop))
                .filter(|v| !v.is_null());
            let current_value = match current_child {
                Some(child) => child.get(related_prop),
                None => current_owner.get(owner_prop),
            }
            .filter(|v| !v.is_null());

            if loose_eq_opt(desired_value, current_value) {
                continue;
            }
            let new_value = match (desired_child, desired_value) {
                (_, Some(value)) => ForeignKeyValue::Known(value.clone()),
                (Some(_), None) => ForeignKeyValue::Pending {
                    relation: relation.name.clone(),
                },
                (None, None) => ForeignKeyValue::Known(Value::Null),
            };
            changes.insert(owner_prop.clone(), new_value);
        }
        changes
    }
}

// =============================================================================
// TESTS
// =============================================================================
