//! # Property Values
//!
//! Entity instances are plain JSON objects. This module holds the rules for
//! reading them:
//! - which property names are internal and never compared
//! - which values are deferred expressions that cannot be compared statically
//! - loose (type-coercing) equality used by change detection

use serde_json::{Map, Value};

/// Own and relation properties of a single entity instance.
pub type Properties = Map<String, Value>;

/// Keys that mark an object value as a deferred expression.
///
/// `{"$raw": "now()"}` or `{"$ref": "otherNode.id"}` are resolved by the
/// executor, so their final value is unknown while planning.
pub const DEFERRED_MARKERS: [&str; 3] = ["$raw", "$ref", "$query"];

/// Whether a property is internal bookkeeping rather than entity data.
#[must_use]
pub fn is_internal_property(name: &str) -> bool {
    name.starts_with('$') || name.starts_with('#')
}

/// Whether a value is a deferred expression.
#[must_use]
pub fn is_deferred(value: &Value) -> bool {
    match value {
        Value::Object(map) => DEFERRED_MARKERS.iter().any(|m| map.contains_key(*m)),
        _ => false,
    }
}

/// View a value as an entity instance, if it is one.
#[must_use]
pub fn as_instance(value: &Value) -> Option<&Properties> {
    value.as_object()
}

/// Loose equality between two property values.
///
/// Scalars compare the way a dynamically typed ORM compares them: a numeric
/// string equals the number it parses to, booleans coerce to `1`/`0`.
/// Arrays and objects compare structurally, element by element.
#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Loose equality between two optional values; two absent values are equal.
#[must_use]
pub fn loose_eq_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => loose_eq(x, y),
        _ => false,
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Canonical string form of a scalar, used to build identity keys.
///
/// Returns `None` for `null`, arrays and objects.
#[must_use]
pub fn canonical_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some((f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_string_equals_number() {
        assert!(loose_eq(&json!("1"), &json!(1)));
        assert!(loose_eq(&json!(1.0), &json!(1)));
        assert!(!loose_eq(&json!("1a"), &json!(1)));
    }

    #[test]
    fn booleans_coerce_to_numbers() {
        assert!(loose_eq(&json!(true), &json!(1)));
        assert!(loose_eq(&json!(false), &json!("0")));
        assert!(!loose_eq(&json!(true), &json!("true")));
    }

    #[test]
    fn null_only_equals_null() {
        assert!(loose_eq(&Value::Null, &Value::Null));
        assert!(!loose_eq(&Value::Null, &json!(0)));
        assert!(!loose_eq(&json!(""), &Value::Null));
    }

    #[test]
    fn structured_values_compare_by_content() {
        assert!(loose_eq(&json!({"a": [1, "2"]}), &json!({"a": ["1", 2]})));
        assert!(!loose_eq(&json!([1, 2]), &json!([1])));
        assert!(!loose_eq(&json!({"a": 1}), &json!({"b": 1})));
        assert!(!loose_eq(&json!([1]), &json!(1)));
    }

    #[test]
    fn internal_and_deferred_detection() {
        assert!(is_internal_property("$id"));
        assert!(is_internal_property("#ref"));
        assert!(!is_internal_property("name"));
        assert!(is_deferred(&json!({"$raw": "now()"})));
        assert!(!is_deferred(&json!({"raw": "now()"})));
    }

    #[test]
    fn canonical_scalars() {
        assert_eq!(canonical_scalar(&json!(10)), Some("10".to_string()));
        assert_eq!(canonical_scalar(&json!(10.0)), Some("10".to_string()));
        assert_eq!(canonical_scalar(&json!("10")), Some("10".to_string()));
        assert_eq!(canonical_scalar(&json!(null)), None);
        assert_eq!(canonical_scalar(&json!([1])), None);
    }
}
