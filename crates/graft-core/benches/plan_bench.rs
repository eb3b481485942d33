//! # Planning Benchmarks
//!
//! Performance benchmarks for graft-core planning.
//!
//! Run with: `cargo bench -p graft-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use graft_core::{ModelSchema, Relation, SchemaRegistry, UpsertPlanner};
use serde_json::{Value, json};
use std::hint::black_box;

fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(
            ModelSchema::new("Person", ["id"])
                .with_relations(vec![Relation::has_many("pets", "Pet", "id", "ownerId")]),
        )
        .with(
            ModelSchema::new("Pet", ["id"])
                .with_relations(vec![Relation::has_many("toys", "Toy", "id", "petId")]),
        )
        .with(ModelSchema::new("Toy", ["id"]))
}

/// A person with `size` pets, each holding three toys.
fn create_graph(size: usize, rename: bool) -> Value {
    let pets: Vec<Value> = (0..size)
        .map(|i| {
            let toys: Vec<Value> = (0..3)
                .map(|t| json!({"id": i * 3 + t, "name": format!("toy-{}", t)}))
                .collect();
            let name = if rename && i % 2 == 0 {
                format!("renamed-{}", i)
            } else {
                format!("pet-{}", i)
            };
            json!({"id": i, "name": name, "toys": toys})
        })
        .collect();
    json!({"id": 1, "name": "owner", "pets": pets})
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_plan_unchanged(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("plan_unchanged");

    for size in [10, 100, 1000].iter() {
        let graph = create_graph(*size, false);
        group.bench_with_input(BenchmarkId::from_parameter(size), &graph, |b, graph| {
            b.iter(|| {
                let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
                black_box(planner.plan(graph, graph).expect("plan"))
            });
        });
    }

    group.finish();
}

fn bench_plan_with_changes(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("plan_with_changes");

    for size in [10, 100, 1000].iter() {
        let desired = create_graph(*size, true);
        let current = create_graph(*size, false);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
                let plan = planner.plan(&desired, &current).expect("plan");
                black_box(plan.steps())
            });
        });
    }

    group.finish();
}

fn bench_fetch_request(c: &mut Criterion) {
    let registry = registry();
    let graph = create_graph(1000, false);

    c.bench_function("fetch_request_1000", |b| {
        b.iter(|| {
            let planner = UpsertPlanner::new(&registry, "Person").expect("planner");
            black_box(planner.fetch_request(&graph).expect("request"))
        });
    });
}

criterion_group!(
    benches,
    bench_plan_unchanged,
    bench_plan_with_changes,
    bench_fetch_request
);
criterion_main!(benches);
