//! # Property-Based Tests
//!
//! Structural invariants of plans over generated Person/Pet graphs, and
//! idempotence: applying a plan and planning again changes nothing, with
//! and without a belongs-to-one vet swapped underneath the person.

use graft_core::{
    ModelSchema, NodeId, OperationType, Properties, Relation, SchemaRegistry, UpsertOption,
    UpsertOptions, UpsertPlan, UpsertPlanner,
};
use proptest::collection::btree_map;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(ModelSchema::new("Person", ["id"]).with_relations(vec![
            Relation::has_many("pets", "Pet", "id", "ownerId"),
            Relation::belongs_to_one("vet", "Vet", "vetId", "id"),
        ]))
        .with(ModelSchema::new("Pet", ["id"]))
        .with(ModelSchema::new("Vet", ["id"]))
}

fn person(name: &str, pets: &BTreeMap<u8, String>) -> Value {
    let pets: Vec<Value> = pets
        .iter()
        .map(|(id, name)| json!({"id": id, "name": name, "ownerId": 1}))
        .collect();
    json!({"id": 1, "name": name, "pets": pets})
}

/// Attach a vet to a person; persisted graphs also carry the foreign key.
fn with_vet(person: Value, vet: Option<u8>, persisted: bool) -> Value {
    let Value::Object(mut person) = person else {
        unreachable!("person is an object");
    };
    let target = vet.map_or(Value::Null, |id| json!({"id": id}));
    if persisted {
        person.insert("vetId".to_string(), vet.map_or(Value::Null, |id| json!(id)));
    }
    person.insert("vet".to_string(), target);
    Value::Object(person)
}

fn planner(registry: &SchemaRegistry) -> UpsertPlanner<'_> {
    UpsertPlanner::new(registry, "Person")
        .expect("planner")
        .with_options(UpsertOptions::new().enable(UpsertOption::InsertMissing))
}

/// Apply a plan the way an executor would and return the new persisted state.
fn apply(plan: &UpsertPlan) -> Value {
    let state = |id: NodeId| -> Option<Properties> {
        let node = plan.node(id).expect("node");
        if node.has(OperationType::Delete) {
            return None;
        }
        if node.has(OperationType::Insert) {
            return node.desired().cloned();
        }
        let mut row = node.current().cloned().expect("persisted row");
        row.extend(plan.patch_payload(id).expect("payload"));
        Some(row)
    };

    let root = plan.roots().next().expect("root");
    let mut person = state(root.id()).expect("root survives");
    let pets: Vec<Value> = root
        .children_of("pets")
        .iter()
        .filter_map(|id| state(*id))
        .map(|mut pet| {
            pet.insert("ownerId".to_string(), json!(1));
            Value::Object(pet)
        })
        .collect();
    person.insert("pets".to_string(), Value::Array(pets));

    let vet = root
        .children_of("vet")
        .iter()
        .filter(|id| plan.node(**id).expect("node").desired().is_some())
        .find_map(|id| state(*id))
        .map_or(Value::Null, Value::Object);
    person.insert("vet".to_string(), vet);
    Value::Object(person)
}

fn pets() -> impl Strategy<Value = BTreeMap<u8, String>> {
    btree_map(0u8..20, "[a-c]{1,3}", 0..8)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Every node carries at least one operation and at least one instance.
    #[test]
    fn nodes_are_well_formed(current in pets(), desired in pets()) {
        let registry = registry();
        let plan = planner(&registry)
            .plan(&person("a", &desired), &person("a", &current))
            .expect("plan");

        for node in plan.nodes() {
            prop_assert!(!node.operations().is_empty());
            prop_assert!(node.desired().is_some() || node.current().is_some());
        }
    }

    /// One node per desired pet, one per dropped pet, one for the root.
    #[test]
    fn node_count_matches_union(current in pets(), desired in pets()) {
        let registry = registry();
        let plan = planner(&registry)
            .plan(&person("a", &desired), &person("a", &current))
            .expect("plan");

        let dropped = current.keys().filter(|id| !desired.contains_key(id)).count();
        prop_assert_eq!(plan.len(), 1 + desired.len() + dropped);
        prop_assert_eq!(plan.nodes_with(OperationType::Delete).count(), dropped);
    }

    /// Planning the same inputs twice gives the same plan.
    #[test]
    fn planning_is_deterministic(current in pets(), desired in pets()) {
        let registry = registry();
        let desired = person("b", &desired);
        let current = person("a", &current);

        let first = planner(&registry).plan(&desired, &current).expect("plan");
        let second = planner(&registry).plan(&desired, &current).expect("plan");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.steps(), second.steps());
    }

    /// Parents always precede their children in the node list.
    #[test]
    fn parents_precede_children(current in pets(), desired in pets()) {
        let registry = registry();
        let plan = planner(&registry)
            .plan(&person("a", &desired), &person("a", &current))
            .expect("plan");

        for node in plan.nodes() {
            if let Some(parent) = node.parent() {
                prop_assert!(parent < node.id());
            }
        }
    }

    /// Applying a plan reaches the desired state: a second plan is a no-op.
    #[test]
    fn applied_plan_is_idempotent(
        current in pets(),
        desired in pets(),
        name in "[a-c]{1,3}",
    ) {
        let registry = registry();
        let desired = person(&name, &desired);
        let first = planner(&registry)
            .plan(&desired, &person("a", &current))
            .expect("plan");

        let persisted = apply(&first);
        let second = planner(&registry).plan(&desired, &persisted).expect("replan");
        prop_assert!(second.is_noop(), "not idempotent: {:?}", second.summary());
    }

    /// Swapping, adding or clearing a belongs-to-one vet also converges.
    #[test]
    fn applied_belongs_to_one_plan_is_idempotent(
        pets in pets(),
        current_vet in proptest::option::of(0u8..4),
        desired_vet in proptest::option::of(0u8..4),
    ) {
        let registry = registry();
        let desired = with_vet(person("a", &pets), desired_vet, false);
        let current = with_vet(person("a", &pets), current_vet, true);
        let first = planner(&registry).plan(&desired, &current).expect("plan");

        let dropped = first
            .nodes()
            .iter()
            .find(|n| n.relation_path() == "vet" && n.has(OperationType::Delete));
        if let Some(vet) = dropped {
            let steps = first.steps();
            let delete = steps.iter().position(|s| s.node == vet.id()).expect("delete step");
            let owner_write = steps.iter().position(|s| s.node == NodeId(0));
            prop_assert!(owner_write.is_none_or(|w| w < delete));
        }

        let persisted = apply(&first);
        let second = planner(&registry).plan(&desired, &persisted).expect("replan");
        prop_assert!(second.is_noop(), "not idempotent: {:?}", second.summary());
    }
}
