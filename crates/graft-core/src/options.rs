//! # Upsert Options
//!
//! Callers steer the planner with flags that are either blanket booleans or
//! lists of relation paths (`"pets"`, `"pets.toys"`). [`UpsertOptions`] is the
//! raw, serializable form; [`OptionsIndex`] is the normalized lookup the
//! planner consults for every node.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// OPTION FLAGS
// =============================================================================

/// The closed set of planner options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertOption {
    /// Relate desired instances whose identity is not under the parent.
    Relate,
    /// Unrelate missing instances instead of deleting them.
    Unrelate,
    /// Insert desired instances whose identity is not under the parent.
    InsertMissing,
    /// Use full updates instead of patches.
    Update,
    /// Never insert.
    NoInsert,
    /// Never update or patch own properties.
    NoUpdate,
    /// Never delete.
    NoDelete,
    /// Never relate.
    NoRelate,
    /// Never unrelate.
    NoUnrelate,
}

/// Where an option applies: everywhere, nowhere, or on listed relation paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionScope {
    /// `true` applies at every path, `false` at none.
    All(bool),
    /// Exact relation paths from the root.
    Paths(Vec<String>),
}

impl OptionScope {
    /// Scope covering the given relation paths.
    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Paths(paths.into_iter().map(Into::into).collect())
    }
}

/// Raw caller options, keyed by flag.
///
/// Serializes as `{"relate": ["pets"], "noDelete": true}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpsertOptions {
    flags: BTreeMap<UpsertOption, OptionScope>,
}

impl UpsertOptions {
    /// Options with every flag off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag's scope.
    #[must_use]
    pub fn with(mut self, option: UpsertOption, scope: OptionScope) -> Self {
        self.flags.insert(option, scope);
        self
    }

    /// Turn a flag on everywhere.
    #[must_use]
    pub fn enable(self, option: UpsertOption) -> Self {
        self.with(option, OptionScope::All(true))
    }

    /// The scope configured for a flag, if any.
    #[must_use]
    pub fn scope(&self, option: UpsertOption) -> Option<&OptionScope> {
        self.flags.get(&option)
    }

    /// Options for a nested run rooted at the node found at `prefix`.
    ///
    /// Path lists keep only entries below `prefix`, with the prefix removed.
    /// Blanket booleans carry over unchanged.
    #[must_use]
    pub fn rebase(&self, prefix: &str) -> Self {
        let lead = format!("{}.", prefix);
        let flags = self
            .flags
            .iter()
            .map(|(option, scope)| {
                let rebased = match scope {
                    OptionScope::All(on) => OptionScope::All(*on),
                    OptionScope::Paths(paths) => OptionScope::Paths(
                        paths
                            .iter()
                            .filter_map(|p| p.strip_prefix(&lead).map(str::to_string))
                            .collect(),
                    ),
                };
                (*option, rebased)
            })
            .collect();
        Self { flags }
    }
}

// =============================================================================
// OPTIONS INDEX
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ActiveScope {
    Everywhere,
    Paths(BTreeSet<String>),
}

/// Normalized option lookup: "is option X active at my path".
///
/// Built once per planning run; classification never looks at the raw
/// option shapes again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsIndex {
    active: BTreeMap<UpsertOption, ActiveScope>,
}

impl OptionsIndex {
    /// Normalize raw options.
    #[must_use]
    pub fn new(options: &UpsertOptions) -> Self {
        let active = options
            .flags
            .iter()
            .filter_map(|(option, scope)| {
                let normalized = match scope {
                    OptionScope::All(true) => ActiveScope::Everywhere,
                    OptionScope::All(false) => return None,
                    OptionScope::Paths(paths) if paths.is_empty() => return None,
                    OptionScope::Paths(paths) => {
                        ActiveScope::Paths(paths.iter().cloned().collect())
                    }
                };
                Some((*option, normalized))
            })
            .collect();
        Self { active }
    }

    /// Whether `option` applies at relation path `path`.
    #[must_use]
    pub fn is_active(&self, option: UpsertOption, path: &str) -> bool {
        match self.active.get(&option) {
            Some(ActiveScope::Everywhere) => true,
            Some(ActiveScope::Paths(paths)) => paths.contains(path),
            None => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
