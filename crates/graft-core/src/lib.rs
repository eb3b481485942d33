//! # graft-core
//!
//! The graph upsert differencing engine for graft - THE LOGIC.
//!
//! Given a desired nested object graph (a root entity with related entities
//! nested arbitrarily deep) and the persisted state that corresponds to it,
//! this crate decides, for every entity in the union of both graphs, which
//! operation is required: insert, update, patch, relate, unrelate, delete,
//! a nested upsert, or nothing.
//!
//! ## Pipeline
//!
//! ```text
//! desired graph ──► UpsertPlanner::fetch_request ──► loader (outside)
//!                                                        │
//!                   current graph ◄──────────────────────┘
//!                        │
//! desired graph ──► UpsertPlanner::plan ──► UpsertPlan ──► executors (outside)
//! ```
//!
//! ## Architectural Constraints
//!
//! - Decides, never executes: no SQL, no I/O, no async
//! - Deterministic: `BTreeMap`/`BTreeSet` only, nodes in pre-order
//! - Models and relations are data (`SchemaRegistry`), not traits on
//!   user types

// =============================================================================
// MODULES
// =============================================================================

pub mod builder;
pub mod change;
pub mod expression;
pub mod identity;
pub mod node;
pub mod options;
pub mod plan;
pub mod policy;
pub mod schema;
pub mod types;
pub mod value;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{GraftError, NodeId, OperationType};

// =============================================================================
// RE-EXPORTS: Schema & Options
// =============================================================================

pub use expression::{RelationExpression, join_path};
pub use identity::{IdentityKey, IdentityKeyer};
pub use options::{OptionScope, OptionsIndex, UpsertOption, UpsertOptions};
pub use schema::{JoinTable, ModelSchema, Relation, RelationKind, RelationProvider, SchemaRegistry};
pub use value::Properties;

// =============================================================================
// RE-EXPORTS: Planning
// =============================================================================

pub use builder::GraphBuilder;
pub use change::{ChangeDetector, ChangeKind, ChangeSet, ForeignKeyValue};
pub use node::GraphNode;
pub use plan::{FetchRequest, NestedUpsert, PlannedStep, UpsertPlan, UpsertPlanner};
pub use policy::{Classification, PolicyContext, RelationPolicy};
