//! # Identity Keys
//!
//! Matching desired instances to persisted ones happens by identity: the
//! values of a model's identifier properties. Composite identifiers are
//! supported; every component must be present for an instance to have an
//! identity at all.

use crate::value::{Properties, canonical_scalar};
use crate::GraftError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A stable, exact-match key derived from an instance's identifier values.
///
/// Components are canonicalized to strings, so `1` and `"1"` produce the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IdentityKey(Vec<String>);

impl IdentityKey {
    /// The canonical components of the key, in identifier order.
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Whether the key has more than one component.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Derives identity keys for instances of one model.
#[derive(Debug, Clone, Copy)]
pub struct IdentityKeyer<'a> {
    model: &'a str,
    id_properties: &'a [String],
}

impl<'a> IdentityKeyer<'a> {
    /// Create a keyer for `model` identified by `id_properties`.
    #[must_use]
    pub const fn new(model: &'a str, id_properties: &'a [String]) -> Self {
        Self {
            model,
            id_properties,
        }
    }

    /// The identifier property names this keyer reads.
    #[must_use]
    pub const fn id_properties(&self) -> &'a [String] {
        self.id_properties
    }

    /// Key of an instance.
    ///
    /// Returns `Ok(None)` when no identifier component is defined; such an
    /// instance can only be inserted. A composite identifier that is only
    /// partially defined, or a component that is not a scalar, is malformed.
    pub fn key(&self, instance: &Properties) -> Result<Option<IdentityKey>, GraftError> {
        let mut parts = Vec::with_capacity(self.id_properties.len());
        let mut missing = Vec::new();

        for prop in self.id_properties {
            match instance.get(prop) {
                None | Some(Value::Null) => missing.push(prop.as_str()),
                Some(value) => {
                    let part = canonical_scalar(value).ok_or_else(|| {
                        GraftError::InvalidCompositeIdentity {
                            model: self.model.to_string(),
                            reason: format!("identifier property '{}' is not a scalar", prop),
                        }
                    })?;
                    parts.push(part);
                }
            }
        }

        if parts.is_empty() {
            return Ok(None);
        }
        if !missing.is_empty() {
            return Err(GraftError::InvalidCompositeIdentity {
                model: self.model.to_string(),
                reason: format!("missing identifier component(s): {}", missing.join(", ")),
            });
        }
        Ok(Some(IdentityKey(parts)))
    }

    /// Key from an explicitly supplied value tuple, e.g. a root identity
    /// handed to the current-state fetch.
    pub fn key_from_values(&self, values: &[Value]) -> Result<IdentityKey, GraftError> {
        if values.len() != self.id_properties.len() {
            return Err(GraftError::InvalidCompositeIdentity {
                model: self.model.to_string(),
                reason: format!(
                    "expected {} identifier component(s), got {}",
                    self.id_properties.len(),
                    values.len()
                ),
            });
        }

        values
            .iter()
            .zip(self.id_properties)
            .map(|(value, prop)| {
                canonical_scalar(value).ok_or_else(|| GraftError::InvalidCompositeIdentity {
                    model: self.model.to_string(),
                    reason: format!("identifier component '{}' is missing or not a scalar", prop),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(IdentityKey)
    }

    /// Human-readable description of an instance for error messages,
    /// e.g. `Pet (id=99)`.
    pub fn describe(&self, instance: &Properties) -> String {
        match self.key(instance) {
            Ok(Some(key)) => format!("{} ({}={})", self.model, self.id_properties.join(","), key),
            _ => format!("{} (new)", self.model),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
