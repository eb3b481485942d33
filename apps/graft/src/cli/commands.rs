//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. Each
//! command renders its output to a `String`; `execute` prints it.

use crate::config::{SchemaFile, read_limited};
use crate::error::AppError;
use graft_core::{
    GraphNode, OperationType, Properties, RelationExpression, SchemaRegistry, UpsertOptions,
    UpsertPlan, UpsertPlanner,
};
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a graph file (100 MB).
const MAX_GRAPH_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum size of an options file (1 MB).
const MAX_OPTIONS_FILE_SIZE: u64 = 1024 * 1024;

async fn read_json(path: &Path, max: u64) -> Result<Value, AppError> {
    let contents = read_limited(path, max).await?;
    serde_json::from_str(&contents).map_err(|e| AppError::Json {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn load_registry(schema: &Path) -> Result<SchemaRegistry, AppError> {
    SchemaFile::load(schema).await?.into_registry()
}

fn render_json(value: &Value) -> Result<String, AppError> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::Output(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Output(e.to_string()))
}

fn planner<'a>(
    registry: &'a SchemaRegistry,
    model: &str,
    allow: Option<&str>,
) -> Result<UpsertPlanner<'a>, AppError> {
    let mut planner = UpsertPlanner::new(registry, model)?;
    if let Some(allow) = allow {
        planner = planner.allow(RelationExpression::parse(allow)?);
    }
    Ok(planner)
}

// =============================================================================
// PLAN COMMAND
// =============================================================================

/// Inputs of the `plan` command.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// Root model.
    pub model: String,
    /// Desired graph file.
    pub desired: PathBuf,
    /// Persisted state file; `None` means nothing is persisted.
    pub current: Option<PathBuf>,
    /// Options file.
    pub options: Option<PathBuf>,
    /// Allow-list expression.
    pub allow: Option<String>,
}

/// Plan an upsert and render the plan.
pub async fn cmd_plan(
    schema: &Path,
    request: &PlanRequest,
    json_mode: bool,
) -> Result<String, AppError> {
    let registry = load_registry(schema).await?;

    let desired = read_json(&request.desired, MAX_GRAPH_FILE_SIZE).await?;
    let current = match &request.current {
        Some(path) => read_json(path, MAX_GRAPH_FILE_SIZE).await?,
        None => Value::Null,
    };
    let options: UpsertOptions = match &request.options {
        Some(path) => {
            let raw = read_json(path, MAX_OPTIONS_FILE_SIZE).await?;
            serde_json::from_value(raw).map_err(|e| AppError::Json {
                path: path.clone(),
                reason: e.to_string(),
            })?
        }
        None => UpsertOptions::new(),
    };

    let planner =
        planner(&registry, &request.model, request.allow.as_deref())?.with_options(options);
    let plan = planner.plan(&desired, &current)?;
    tracing::info!(model = %request.model, nodes = plan.len(), "plan complete");

    if json_mode {
        render_json(&plan_json(&planner, &plan)?)
    } else {
        plan_text(&registry, &plan)
    }
}

fn plan_json(planner: &UpsertPlanner<'_>, plan: &UpsertPlan) -> Result<Value, AppError> {
    let mut payloads = serde_json::Map::new();
    for node in plan.nodes() {
        if node.has(OperationType::Update) || node.has(OperationType::Patch) {
            let payload = plan.patch_payload(node.id())?;
            payloads.insert(node.id().index().to_string(), Value::Object(payload));
        }
    }

    let mut nested = Vec::new();
    for node in plan.nodes_with(OperationType::UpsertRecursively) {
        if let Some(run) = planner.nested(plan, node.id())? {
            nested.push(json!({
                "node": node.id(),
                "model": node.model(),
                "options": to_json(run.planner.options())?,
                "fetch": to_json(&run.planner.fetch_request(&run.desired)?)?,
            }));
        }
    }

    Ok(json!({
        "model": plan.model(),
        "noop": plan.is_noop(),
        "summary": to_json(&plan.summary())?,
        "nodes": to_json(&plan.nodes())?,
        "steps": to_json(&plan.steps())?,
        "payloads": payloads,
        "nested": nested,
    }))
}

fn describe(registry: &SchemaRegistry, node: &GraphNode) -> Result<String, AppError> {
    let keyer = registry.model(node.model())?.keyer();
    Ok(node
        .current()
        .or(node.desired())
        .map(|instance| keyer.describe(instance))
        .unwrap_or_else(|| node.model().to_string()))
}

fn format_payload(payload: &Properties) -> String {
    payload
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn plan_text(registry: &SchemaRegistry, plan: &UpsertPlan) -> Result<String, AppError> {
    let mut out = String::new();
    let _ = writeln!(out, "Upsert Plan ({})", plan.model());
    let _ = writeln!(out, "==================");

    for node in plan.nodes() {
        let ops: Vec<&str> = node.operations().iter().map(|op| op.as_str()).collect();
        let path = if node.relation_path().is_empty() {
            "<root>"
        } else {
            node.relation_path()
        };
        let _ = writeln!(
            out,
            "{:<5} {:<24} {:<16} {}",
            node.id().to_string(),
            describe(registry, node)?,
            path,
            ops.join(", ")
        );
    }

    let steps = plan.steps();
    let _ = writeln!(out);
    if steps.is_empty() {
        let _ = writeln!(out, "Nothing to do.");
        return Ok(out);
    }

    let _ = writeln!(out, "Steps:");
    for (i, step) in steps.iter().enumerate() {
        let node = plan.node(step.node)?;
        let mut line = format!(
            "{:>4}. {:<18} {}",
            i + 1,
            step.operation.as_str(),
            describe(registry, node)?
        );
        if step.operation.is_write() {
            let payload = plan.patch_payload(step.node)?;
            line.push_str(&format!(" {{{}}}", format_payload(&payload)));
        }
        let _ = writeln!(out, "{}", line);
    }

    let _ = writeln!(out);
    let summary: Vec<String> = plan
        .summary()
        .iter()
        .filter(|(op, _)| **op != OperationType::None)
        .map(|(op, count)| format!("{}={}", op, count))
        .collect();
    let _ = write!(out, "Summary: {}", summary.join(" "));
    Ok(out)
}

// =============================================================================
// FETCH REQUEST COMMAND
// =============================================================================

/// Describe the persisted state to load for a desired graph.
pub async fn cmd_fetch_request(
    schema: &Path,
    model: &str,
    desired: &Path,
    allow: Option<&str>,
    json_mode: bool,
) -> Result<String, AppError> {
    let registry = load_registry(schema).await?;
    let desired = read_json(desired, MAX_GRAPH_FILE_SIZE).await?;
    let request = planner(&registry, model, allow)?.fetch_request(&desired)?;

    if json_mode {
        return render_json(&to_json(&request)?);
    }

    let mut out = String::new();
    let roots: Vec<String> = request.roots.iter().map(ToString::to_string).collect();
    let _ = writeln!(out, "Model:      {}", request.model);
    let _ = writeln!(out, "Roots:      [{}]", roots.join(", "));
    let _ = writeln!(out, "Relations:  {}", request.expression);
    let _ = write!(out, "Columns:");
    for (path, columns) in &request.columns {
        let path = if path.is_empty() { "<root>" } else { path };
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        let _ = write!(out, "\n  {:<16} {}", path, columns.join(", "));
    }
    Ok(out)
}

// =============================================================================
// CHECK SCHEMA COMMAND
// =============================================================================

/// Validate the schema file and list its models.
pub async fn cmd_check_schema(schema: &Path, json_mode: bool) -> Result<String, AppError> {
    let registry = load_registry(schema).await?;

    let mut models = Vec::new();
    for name in registry.model_names() {
        let model = registry.model(name)?;
        let relations: Vec<Value> = model
            .relations(&registry)?
            .values()
            .map(|r| {
                json!({
                    "name": r.name,
                    "kind": r.kind.as_str(),
                    "model": r.related_model,
                    "owner": r.owner_properties,
                    "related": r.related_properties,
                })
            })
            .collect();
        models.push(json!({
            "name": name,
            "id": model.id_properties(),
            "relations": relations,
        }));
    }

    if json_mode {
        return render_json(&json!({ "valid": true, "models": models }));
    }

    let mut out = String::new();
    let _ = writeln!(out, "Schema OK: {}", schema.display());
    for name in registry.model_names() {
        let model = registry.model(name)?;
        let _ = write!(out, "\n{} ({})", name, model.id_properties().join(", "));
        for relation in model.relations(&registry)?.values() {
            let _ = write!(
                out,
                "\n  {:<16} {:<14} -> {}",
                relation.name,
                relation.kind.as_str(),
                relation.related_model
            );
        }
    }
    Ok(out)
}
