//! # Schema Registry
//!
//! Model and relation descriptors consumed by the planner:
//! - identifier properties per model (`ModelSchema::id_properties`)
//! - relation descriptors per model (`ModelSchema::relation`)
//!
//! ## Lazy Relation Mappings
//!
//! Models frequently reference each other (`Person.pets` ↔ `Pet.owner`).
//! Relations are therefore supplied through a provider that is evaluated at
//! most once per model and cached. A provider that re-enters its own model's
//! resolution gets `GraftError::CircularRelationMapping` instead of
//! recursing forever.

use crate::identity::IdentityKeyer;
use crate::GraftError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

// =============================================================================
// RELATION DESCRIPTORS
// =============================================================================

/// Join table of a many-to-many or has-one-through relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTable {
    /// Join table name.
    pub table: String,
    /// Join columns referencing the owner's `owner_properties`.
    pub owner_columns: Vec<String>,
    /// Join columns referencing the related model's `related_properties`.
    pub related_columns: Vec<String>,
    /// Extra columns stored on the join row.
    #[serde(default)]
    pub extra: Vec<String>,
}

/// The kind of a relation, carrying kind-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// The owner holds a foreign key to one related entity.
    BelongsToOne,
    /// One related entity holds a foreign key to the owner.
    HasOne,
    /// Many related entities hold a foreign key to the owner.
    HasMany,
    /// Owner and related entities are linked through a join table.
    ManyToMany(JoinTable),
    /// One related entity is linked through a join table.
    HasOneThrough(JoinTable),
}

impl RelationKind {
    /// Whether the relation holds at most one related entity.
    #[must_use]
    pub const fn is_single(&self) -> bool {
        matches!(self, Self::BelongsToOne | Self::HasOne | Self::HasOneThrough(_))
    }

    /// The join table, for relations that use one.
    #[must_use]
    pub const fn join_table(&self) -> Option<&JoinTable> {
        match self {
            Self::ManyToMany(join) | Self::HasOneThrough(join) => Some(join),
            Self::BelongsToOne | Self::HasOne | Self::HasMany => None,
        }
    }

    /// Stable name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsToOne => "belongsToOne",
            Self::HasOne => "hasOne",
            Self::HasMany => "hasMany",
            Self::ManyToMany(_) => "manyToMany",
            Self::HasOneThrough(_) => "hasOneThrough",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation from an owner model to a related model.
///
/// `owner_properties` live on the owner, `related_properties` on the related
/// model. For `BelongsToOne` the owner properties are the foreign key; for
/// `HasOne`/`HasMany` the related properties are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation property name on the owner.
    pub name: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Name of the related model in the registry.
    pub related_model: String,
    /// Key properties on the owner side.
    pub owner_properties: Vec<String>,
    /// Key properties on the related side.
    pub related_properties: Vec<String>,
}

impl Relation {
    /// Create a relation with explicit keys.
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        related_model: impl Into<String>,
        owner_properties: &[&str],
        related_properties: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            related_model: related_model.into(),
            owner_properties: owner_properties.iter().map(|s| (*s).to_string()).collect(),
            related_properties: related_properties.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// `owner.<fk>` → `related.<key>`.
    pub fn belongs_to_one(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: &str,
        related_key: &str,
    ) -> Self {
        Self::new(
            name,
            RelationKind::BelongsToOne,
            related_model,
            &[foreign_key],
            &[related_key],
        )
    }

    /// `owner.<key>` ← `related.<fk>`, at most one related entity.
    pub fn has_one(
        name: impl Into<String>,
        related_model: impl Into<String>,
        owner_key: &str,
        foreign_key: &str,
    ) -> Self {
        Self::new(name, RelationKind::HasOne, related_model, &[owner_key], &[foreign_key])
    }

    /// `owner.<key>` ← `related.<fk>`, any number of related entities.
    pub fn has_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        owner_key: &str,
        foreign_key: &str,
    ) -> Self {
        Self::new(name, RelationKind::HasMany, related_model, &[owner_key], &[foreign_key])
    }

    /// `owner.<key>` ↔ `join` ↔ `related.<key>`.
    pub fn many_to_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        owner_key: &str,
        related_key: &str,
        join: JoinTable,
    ) -> Self {
        Self::new(
            name,
            RelationKind::ManyToMany(join),
            related_model,
            &[owner_key],
            &[related_key],
        )
    }

    /// Column names on the join row, if the relation uses one.
    #[must_use]
    pub fn join_columns(&self) -> Vec<&str> {
        self.kind
            .join_table()
            .map(|join| {
                join.owner_columns
                    .iter()
                    .chain(&join.related_columns)
                    .chain(&join.extra)
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate(&self, owner: &str, registry: &SchemaRegistry) -> Result<(), GraftError> {
        let invalid = |reason: String| GraftError::InvalidSchema {
            model: owner.to_string(),
            reason,
        };

        registry.model(&self.related_model)?;

        if self.owner_properties.is_empty() {
            return Err(invalid(format!("relation '{}' has no owner keys", self.name)));
        }
        if self.owner_properties.len() != self.related_properties.len() {
            return Err(invalid(format!(
                "relation '{}' has {} owner key(s) but {} related key(s)",
                self.name,
                self.owner_properties.len(),
                self.related_properties.len()
            )));
        }
        if let Some(join) = self.kind.join_table() {
            if join.owner_columns.len() != self.owner_properties.len()
                || join.related_columns.len() != self.related_properties.len()
            {
                return Err(invalid(format!(
                    "join table '{}' of relation '{}' does not match the relation keys",
                    join.table, self.name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// MODEL SCHEMA
// =============================================================================

/// Provider that yields a model's relations on first use.
pub type RelationProvider =
    Arc<dyn Fn(&SchemaRegistry) -> Result<Vec<Relation>, GraftError> + Send + Sync>;

/// Descriptor of one model class.
pub struct ModelSchema {
    name: String,
    id_properties: Vec<String>,
    provider: RelationProvider,
    resolved: OnceLock<BTreeMap<String, Relation>>,
    resolving: Mutex<Vec<ThreadId>>,
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("id_properties", &self.id_properties)
            .field("relations", &self.resolved.get())
            .finish()
    }
}

impl ModelSchema {
    /// A model with no relations.
    pub fn new<I, S>(name: impl Into<String>, id_properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            id_properties: id_properties.into_iter().map(Into::into).collect(),
            provider: Arc::new(|_| Ok(Vec::new())),
            resolved: OnceLock::new(),
            resolving: Mutex::new(Vec::new()),
        }
    }

    /// Use a fixed relation list.
    #[must_use]
    pub fn with_relations(self, relations: Vec<Relation>) -> Self {
        self.with_relation_provider(move |_| Ok(relations.clone()))
    }

    /// Resolve relations lazily through `provider`.
    #[must_use]
    pub fn with_relation_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn(&SchemaRegistry) -> Result<Vec<Relation>, GraftError> + Send + Sync + 'static,
    {
        self.provider = Arc::new(provider);
        self.resolved = OnceLock::new();
        self
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier properties, possibly composite.
    #[must_use]
    pub fn id_properties(&self) -> &[String] {
        &self.id_properties
    }

    /// Keyer for instances of this model.
    #[must_use]
    pub fn keyer(&self) -> IdentityKeyer<'_> {
        IdentityKeyer::new(&self.name, &self.id_properties)
    }

    /// Relations of this model, resolving the provider on first use.
    pub fn relations(
        &self,
        registry: &SchemaRegistry,
    ) -> Result<&BTreeMap<String, Relation>, GraftError> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved);
        }

        let me = thread::current().id();
        {
            let mut active = self
                .resolving
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if active.contains(&me) {
                return Err(GraftError::CircularRelationMapping(self.name.clone()));
            }
            active.push(me);
        }

        let outcome = (self.provider)(registry);

        self.resolving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| *id != me);

        let mut relations = BTreeMap::new();
        for relation in outcome? {
            let name = relation.name.clone();
            if relations.insert(name.clone(), relation).is_some() {
                return Err(GraftError::InvalidSchema {
                    model: self.name.clone(),
                    reason: format!("relation '{}' is declared twice", name),
                });
            }
        }
        Ok(self.resolved.get_or_init(|| relations))
    }

    /// Descriptor of one relation.
    pub fn relation(&self, registry: &SchemaRegistry, name: &str) -> Result<&Relation, GraftError> {
        self.relations(registry)?
            .get(name)
            .ok_or_else(|| GraftError::UnknownRelation {
                model: self.name.clone(),
                relation: name.to_string(),
            })
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// All model descriptors, keyed by name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, ModelSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any previous model of the same name.
    pub fn register(&mut self, model: ModelSchema) {
        self.models.insert(model.name.clone(), model);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, model: ModelSchema) -> Self {
        self.register(model);
        self
    }

    /// Look up a model.
    pub fn model(&self, name: &str) -> Result<&ModelSchema, GraftError> {
        self.models
            .get(name)
            .ok_or_else(|| GraftError::UnknownModel(name.to_string()))
    }

    /// Names of every registered model, in order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Resolve every model's relations and check them for consistency.
    pub fn validate(&self) -> Result<(), GraftError> {
        for model in self.models.values() {
            if model.id_properties.is_empty() {
                return Err(GraftError::InvalidSchema {
                    model: model.name.clone(),
                    reason: "no identifier properties".to_string(),
                });
            }
            for relation in model.relations(self)?.values() {
                relation.validate(&model.name, self)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
