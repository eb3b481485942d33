//! # Relation Expressions
//!
//! The set of relation names (and their nested relation names) present in a
//! graph. Used to restrict the current-state fetch and to validate a graph
//! against the caller's allow-list.
//!
//! ## Textual Form
//!
//! ```text
//! [pets.[toys, vet], owner]      two top-level relations
//! pets.toys                      shorthand for pets.[toys]
//! [pets.*]                       pets and anything below it (allow-lists)
//! ```

use crate::schema::{Relation, SchemaRegistry};
use crate::value::Properties;
use crate::GraftError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A tree of relation names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationExpression {
    children: BTreeMap<String, RelationExpression>,
    any: bool,
}

impl RelationExpression {
    /// The empty expression.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expression admitting every relation at every depth.
    #[must_use]
    pub fn any() -> Self {
        Self {
            children: BTreeMap::new(),
            any: true,
        }
    }

    /// Whether the expression names no relation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && !self.any
    }

    /// Sub-expression below a relation, if named.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children.get(name)
    }

    /// Sub-expression admitted below a dotted relation path.
    ///
    /// A wildcard on the way down admits everything below it; a name the
    /// expression does not contain admits nothing.
    #[must_use]
    pub fn below(&self, path: &str) -> Self {
        let mut current = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            if current.any {
                return Self::any();
            }
            match current.children.get(segment) {
                Some(sub) => current = sub,
                None => return Self::new(),
            }
        }
        current.clone()
    }

    /// Relation names at this level, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Add a relation at this level and return its sub-expression.
    pub fn insert(&mut self, name: &str) -> &mut Self {
        self.children.entry(name.to_string()).or_default()
    }

    /// Add every relation named in `other`.
    pub fn merge(&mut self, other: &Self) {
        self.any |= other.any;
        for (name, sub) in &other.children {
            self.insert(name).merge(sub);
        }
    }

    /// Whether every relation in `self` is admitted by `allowed`.
    #[must_use]
    pub fn is_subset_of(&self, allowed: &Self) -> bool {
        if allowed.any {
            return true;
        }
        if self.any {
            return false;
        }
        self.children.iter().all(|(name, sub)| {
            allowed
                .children
                .get(name)
                .is_some_and(|allowed_sub| sub.is_subset_of(allowed_sub))
        })
    }

    /// Every dotted relation path named by the expression, parents first.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, sub) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            out.push(path.clone());
            sub.collect_paths(&path, out);
        }
    }

    // =========================================================================
    // FROM GRAPH
    // =========================================================================

    /// Relations present in a graph of `model` instances.
    ///
    /// `graph` is a single instance, an array of instances or `null`. Only
    /// properties declared as relations on the model count; everything else
    /// is plain data.
    pub fn from_graph(
        registry: &SchemaRegistry,
        model: &str,
        graph: &Value,
    ) -> Result<Self, GraftError> {
        let mut expr = Self::new();
        for instance in instances(graph, "")? {
            expr.collect_instance(registry, model, instance, "")?;
        }
        Ok(expr)
    }

    fn collect_instance(
        &mut self,
        registry: &SchemaRegistry,
        model: &str,
        instance: &Properties,
        path: &str,
    ) -> Result<(), GraftError> {
        let schema = registry.model(model)?;
        for (name, relation) in schema.relations(registry)? {
            let Some(value) = instance.get(name) else {
                continue;
            };
            let child_path = join_path(path, name);
            let sub = self.insert(name);
            for child in related_instances(relation, value, &child_path)? {
                sub.collect_instance(registry, &relation.related_model, child, &child_path)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // PARSING
    // =========================================================================

    /// Parse the textual form.
    pub fn parse(input: &str) -> Result<Self, GraftError> {
        let mut parser = Parser {
            input,
            chars: input.char_indices().peekable(),
        };
        parser.skip_ws();
        if parser.peek().is_none() {
            return Ok(Self::new());
        }
        let expr = parser.list()?;
        parser.skip_ws();
        if let Some(c) = parser.peek() {
            return Err(parser.error(format!("unexpected '{}'", c)));
        }
        Ok(expr)
    }
}

/// Join a parent relation path and a relation name.
#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Instances held by a collection-valued relation (or a set of roots).
pub(crate) fn instances<'a>(value: &'a Value, path: &str) -> Result<Vec<&'a Properties>, GraftError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| GraftError::InvalidGraph {
                    path: path.to_string(),
                    reason: format!("expected an object, found {}", kind_of(item)),
                })
            })
            .collect(),
        other => Err(GraftError::InvalidGraph {
            path: path.to_string(),
            reason: format!("expected objects, found {}", kind_of(other)),
        }),
    }
}

/// Instance held by a single-valued relation.
pub(crate) fn single_instance<'a>(
    value: &'a Value,
    path: &str,
) -> Result<Option<&'a Properties>, GraftError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(GraftError::InvalidGraph {
            path: path.to_string(),
            reason: format!("expected an object or null, found {}", kind_of(other)),
        }),
    }
}

/// Instances held by a relation property, according to its cardinality.
pub(crate) fn related_instances<'a>(
    relation: &Relation,
    value: &'a Value,
    path: &str,
) -> Result<Vec<&'a Properties>, GraftError> {
    if relation.kind.is_single() {
        Ok(single_instance(value, path)?.into_iter().collect())
    } else {
        instances(value, path)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// DISPLAY
// =============================================================================

impl fmt::Display for RelationExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.items();
        if items.len() == 1 {
            f.write_str(&items[0])
        } else {
            write!(f, "[{}]", items.join(", "))
        }
    }
}

impl RelationExpression {
    fn items(&self) -> Vec<String> {
        let mut items: Vec<String> = self
            .children
            .iter()
            .map(|(name, sub)| {
                let sub_items = sub.items();
                match sub_items.len() {
                    0 => name.clone(),
                    1 => format!("{}.{}", name, sub_items[0]),
                    _ => format!("{}.[{}]", name, sub_items.join(", ")),
                }
            })
            .collect();
        if self.any {
            items.push("*".to_string());
        }
        items
    }
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Parser<'_> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.chars.next();
        }
    }

    fn error(&self, reason: String) -> GraftError {
        GraftError::InvalidExpression {
            input: self.input.to_string(),
            reason,
        }
    }

    /// `list := item | '[' (item (',' item)*)? ']'`
    fn list(&mut self) -> Result<RelationExpression, GraftError> {
        let mut expr = RelationExpression::new();
        self.skip_ws();
        if self.peek() != Some('[') {
            self.item(&mut expr)?;
            return Ok(expr);
        }

        self.chars.next();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.chars.next();
            return Ok(expr);
        }
        loop {
            self.item(&mut expr)?;
            self.skip_ws();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ']')) => return Ok(expr),
                Some((_, c)) => return Err(self.error(format!("unexpected '{}'", c))),
                None => return Err(self.error("unterminated '['".to_string())),
            }
        }
    }

    /// `item := '*' | name ('.' list)?`
    fn item(&mut self, into: &mut RelationExpression) -> Result<(), GraftError> {
        self.skip_ws();
        if self.peek() == Some('*') {
            self.chars.next();
            into.any = true;
            return Ok(());
        }

        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(match self.peek() {
                Some(c) => self.error(format!("expected a relation name, found '{}'", c)),
                None => self.error("expected a relation name".to_string()),
            });
        }

        self.skip_ws();
        let sub = if self.peek() == Some('.') {
            self.chars.next();
            self.list()?
        } else {
            RelationExpression::new()
        };
        into.insert(&name).merge(&sub);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelSchema;
    use serde_json::json;

    fn parse(s: &str) -> RelationExpression {
        RelationExpression::parse(s).expect("parse")
    }

    #[test]
    fn parse_and_render() {
        let expr = parse("[pets.[toys, vet], owner]");
        assert_eq!(expr.to_string(), "[owner, pets.[toys, vet]]");
        assert_eq!(parse(&expr.to_string()), expr);

        assert_eq!(parse("pets.toys").to_string(), "pets.toys");
        assert_eq!(parse("").to_string(), "[]");
        assert_eq!(parse("[]"), RelationExpression::new());
    }

    #[test]
    fn parse_errors() {
        for bad in ["[pets", "pets.", "[pets,,owner]", "pets owner", "pets.[toys"] {
            assert!(
                matches!(
                    RelationExpression::parse(bad),
                    Err(GraftError::InvalidExpression { .. })
                ),
                "{} should not parse",
                bad
            );
        }
    }

    #[test]
    fn subset_checks() {
        let allowed = parse("[pets.toys, owner]");

        assert!(parse("pets").is_subset_of(&allowed));
        assert!(parse("[pets.toys, owner]").is_subset_of(&allowed));
        assert!(!parse("pets.vet").is_subset_of(&allowed));
        assert!(!parse("friends").is_subset_of(&allowed));
        assert!(RelationExpression::new().is_subset_of(&allowed));
    }

    #[test]
    fn wildcard_admits_everything_below() {
        let allowed = parse("[pets.*]");

        assert!(parse("pets.toys.maker").is_subset_of(&allowed));
        assert!(!parse("owner").is_subset_of(&allowed));
        assert!(parse("[a.b, c]").is_subset_of(&RelationExpression::any()));
    }

    #[test]
    fn below_follows_paths_and_wildcards() {
        let allowed = parse("[pets.[toys.maker, vet], friends.*]");

        assert_eq!(allowed.below("pets"), parse("[toys.maker, vet]"));
        assert_eq!(allowed.below("pets.toys"), parse("maker"));
        assert_eq!(allowed.below("friends.pets"), RelationExpression::any());
        assert!(allowed.below("owner").is_empty());
        assert_eq!(allowed.below(""), allowed);
    }

    #[test]
    fn paths_list_parents_first() {
        assert_eq!(
            parse("[pets.toys, owner]").paths(),
            vec!["owner", "pets", "pets.toys"]
        );
    }

    #[test]
    fn from_graph_collects_declared_relations() {
        let registry = SchemaRegistry::new()
            .with(ModelSchema::new("Person", ["id"]).with_relations(vec![
                Relation::has_many("pets", "Pet", "id", "ownerId"),
                Relation::belongs_to_one("parent", "Person", "parentId", "id"),
            ]))
            .with(ModelSchema::new("Pet", ["id"]));

        let graph = json!([
            {"id": 1, "pets": [{"name": "Rex"}], "tags": ["x"]},
            {"id": 2, "parent": {"id": 1, "pets": []}}
        ]);
        let expr = RelationExpression::from_graph(&registry, "Person", &graph).expect("expr");

        assert_eq!(expr.to_string(), "[parent.pets, pets]");
    }

    #[test]
    fn from_graph_rejects_wrong_shapes() {
        let registry = SchemaRegistry::new()
            .with(ModelSchema::new("Person", ["id"]).with_relations(vec![
                Relation::belongs_to_one("parent", "Person", "parentId", "id"),
            ]));

        let result =
            RelationExpression::from_graph(&registry, "Person", &json!({"parent": [{"id": 1}]}));
        assert!(matches!(result, Err(GraftError::InvalidGraph { .. })));
    }
}
