//! # Schema Files
//!
//! Models and relations are described in TOML:
//!
//! ```toml
//! [models.Person]
//! id = ["id"]
//!
//! [models.Person.relations.pets]
//! kind = "hasMany"
//! model = "Pet"
//! owner = ["id"]
//! related = ["ownerId"]
//!
//! [models.Person.relations.clubs]
//! kind = "manyToMany"
//! model = "Club"
//! owner = ["id"]
//! related = ["id"]
//! join = { table = "memberships", owner = ["personId"], related = ["clubId"], extra = ["role"] }
//! ```
//!
//! A loaded file is converted to a validated [`SchemaRegistry`].

use crate::error::AppError;
use graft_core::{JoinTable, ModelSchema, Relation, RelationKind, SchemaRegistry};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Maximum schema file size (1 MB).
const MAX_SCHEMA_FILE_SIZE: u64 = 1024 * 1024;

/// Top-level schema file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    /// Models by name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

/// One `[models.<Name>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Identifier properties.
    pub id: Vec<String>,
    /// Relations by property name.
    #[serde(default)]
    pub relations: BTreeMap<String, RelationConfig>,
}

/// Relation kinds as written in schema files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KindConfig {
    /// `belongsToOne`
    BelongsToOne,
    /// `hasOne`
    HasOne,
    /// `hasMany`
    HasMany,
    /// `manyToMany`
    ManyToMany,
    /// `hasOneThrough`
    HasOneThrough,
}

/// One `[models.<Name>.relations.<rel>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationConfig {
    /// Relation kind.
    pub kind: KindConfig,
    /// Related model name.
    pub model: String,
    /// Key properties on the owner.
    pub owner: Vec<String>,
    /// Key properties on the related model.
    pub related: Vec<String>,
    /// Join table for `manyToMany` and `hasOneThrough`.
    pub join: Option<JoinConfig>,
}

/// Inline join table description.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinConfig {
    /// Table name.
    pub table: String,
    /// Columns referencing the owner keys.
    pub owner: Vec<String>,
    /// Columns referencing the related keys.
    pub related: Vec<String>,
    /// Extra columns on the join row.
    #[serde(default)]
    pub extra: Vec<String>,
}

impl SchemaFile {
    /// Parse schema file contents.
    pub fn parse(contents: &str) -> Result<Self, AppError> {
        toml::from_str(contents).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Read and parse a schema file.
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let contents = read_limited(path, MAX_SCHEMA_FILE_SIZE).await?;
        tracing::debug!(path = %path.display(), "loaded schema file");
        Self::parse(&contents)
    }

    /// Build and validate the registry the file describes.
    pub fn into_registry(self) -> Result<SchemaRegistry, AppError> {
        let mut registry = SchemaRegistry::new();
        for (name, model) in self.models {
            let relations = model
                .relations
                .into_iter()
                .map(|(rel, config)| config.into_relation(&name, rel))
                .collect::<Result<Vec<_>, _>>()?;
            registry.register(ModelSchema::new(name, model.id).with_relations(relations));
        }
        registry.validate()?;
        Ok(registry)
    }
}

impl RelationConfig {
    fn into_relation(self, owner: &str, name: String) -> Result<Relation, AppError> {
        let join = self.join.map(|join| JoinTable {
            table: join.table,
            owner_columns: join.owner,
            related_columns: join.related,
            extra: join.extra,
        });

        let kind = match (self.kind, join) {
            (KindConfig::ManyToMany, Some(join)) => RelationKind::ManyToMany(join),
            (KindConfig::HasOneThrough, Some(join)) => RelationKind::HasOneThrough(join),
            (KindConfig::ManyToMany | KindConfig::HasOneThrough, None) => {
                return Err(AppError::Config(format!(
                    "relation {}.{} needs a join table",
                    owner, name
                )));
            }
            (_, Some(_)) => {
                return Err(AppError::Config(format!(
                    "relation {}.{} does not use a join table",
                    owner, name
                )));
            }
            (KindConfig::BelongsToOne, None) => RelationKind::BelongsToOne,
            (KindConfig::HasOne, None) => RelationKind::HasOne,
            (KindConfig::HasMany, None) => RelationKind::HasMany,
        };

        Ok(Relation {
            name,
            kind,
            related_model: self.model,
            owner_properties: self.owner,
            related_properties: self.related,
        })
    }
}

/// Read a UTF-8 file after checking its size.
pub async fn read_limited(path: &Path, max: u64) -> Result<String, AppError> {
    let io = |source| AppError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(io)?;
    if metadata.len() > max {
        return Err(AppError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max,
        });
    }
    tokio::fs::read_to_string(path).await.map_err(io)
}

// =============================================================================
// TESTS
// =============================================================================
