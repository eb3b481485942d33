//! Integration tests for the CLI commands, driven through temporary files.

use graft::AppError;
use graft::cli::{PlanRequest, cmd_check_schema, cmd_fetch_request, cmd_plan};
use graft_core::GraftError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SCHEMA: &str = r#"
[models.Person]
id = ["id"]

[models.Person.relations.pets]
kind = "hasMany"
model = "Pet"
owner = ["id"]
related = ["ownerId"]

[models.Pet]
id = ["id"]
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

fn request(desired: &Path, current: Option<&Path>, options: Option<&Path>) -> PlanRequest {
    PlanRequest {
        model: "Person".to_string(),
        desired: desired.to_path_buf(),
        current: current.map(Path::to_path_buf),
        options: options.map(Path::to_path_buf),
        allow: None,
    }
}

// =============================================================================
// PLAN COMMAND
// =============================================================================

#[tokio::test]
async fn plan_json_reports_operations_and_payloads() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(
        &dir,
        "desired.json",
        r#"{"id": 1, "pets": [{"id": 10, "name": "RexUpdated"}, {"name": "New"}]}"#,
    );
    let current = write(
        &dir,
        "current.json",
        r#"{"id": 1, "pets": [{"id": 10, "name": "Rex"}, {"id": 11, "name": "Old"}]}"#,
    );

    let output = cmd_plan(&schema, &request(&desired, Some(&current), None), true)
        .await
        .expect("plan");
    let value: serde_json::Value = serde_json::from_str(&output).expect("json output");

    assert_eq!(value["noop"], serde_json::json!(false));
    assert_eq!(value["summary"]["patch"], serde_json::json!(1));
    assert_eq!(value["summary"]["insert"], serde_json::json!(1));
    assert_eq!(value["summary"]["delete"], serde_json::json!(1));
    assert_eq!(value["payloads"]["1"]["name"], serde_json::json!("RexUpdated"));
    assert_eq!(value["steps"][0]["operation"], serde_json::json!("delete"));
}

#[tokio::test]
async fn plan_text_lists_steps() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(&dir, "desired.json", r#"{"name": "Alice", "pets": [{"name": "Rex"}]}"#);

    let output = cmd_plan(&schema, &request(&desired, None, None), false)
        .await
        .expect("plan");

    assert!(output.contains("Steps:"));
    assert!(output.contains("insert"));
    assert!(output.contains("Summary: insert=2"));
}

#[tokio::test]
async fn plan_reads_options_file() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(&dir, "desired.json", r#"{"id": 1, "pets": []}"#);
    let current = write(&dir, "current.json", r#"{"id": 1, "pets": [{"id": 10}]}"#);
    let options = write(&dir, "options.json", r#"{"unrelate": ["pets"]}"#);

    let output = cmd_plan(&schema, &request(&desired, Some(&current), Some(&options)), true)
        .await
        .expect("plan");
    let value: serde_json::Value = serde_json::from_str(&output).expect("json output");

    assert_eq!(value["summary"]["unrelate"], serde_json::json!(1));
    assert!(value["summary"].get("delete").is_none());
}

#[tokio::test]
async fn plan_surfaces_ambiguous_identity() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(&dir, "desired.json", r#"{"id": 1, "pets": [{"id": 99}]}"#);
    let current = write(&dir, "current.json", r#"{"id": 1, "pets": []}"#);

    let result = cmd_plan(&schema, &request(&desired, Some(&current), None), true).await;
    assert!(matches!(
        result,
        Err(AppError::Graft(GraftError::AmbiguousIdentity { .. }))
    ));
}

#[tokio::test]
async fn plan_rejects_unknown_option_flags() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(&dir, "desired.json", r#"{"id": 1}"#);
    let options = write(&dir, "options.json", r#"{"relateEverything": true}"#);

    let result = cmd_plan(&schema, &request(&desired, None, Some(&options)), true).await;
    assert!(matches!(result, Err(AppError::Json { .. })));
}

#[tokio::test]
async fn missing_input_is_an_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let missing = dir.path().join("nope.json");

    let result = cmd_plan(&schema, &request(&missing, None, None), true).await;
    assert!(matches!(result, Err(AppError::Io { .. })));
}

// =============================================================================
// FETCH REQUEST AND SCHEMA COMMANDS
// =============================================================================

#[tokio::test]
async fn fetch_request_json() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(&dir, "desired.json", r#"[{"id": 1, "pets": [{"name": "a"}]}, {"id": 2}]"#);

    let output = cmd_fetch_request(&schema, "Person", &desired, Some("pets"), true)
        .await
        .expect("fetch request");
    let value: serde_json::Value = serde_json::from_str(&output).expect("json output");

    assert_eq!(value["expression"], serde_json::json!("pets"));
    assert_eq!(value["roots"], serde_json::json!([["1"], ["2"]]));
    assert_eq!(
        value["columns"]["pets"],
        serde_json::json!(["id", "name", "ownerId"])
    );
}

#[tokio::test]
async fn fetch_request_respects_allow_list() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);
    let desired = write(&dir, "desired.json", r#"{"id": 1, "pets": []}"#);

    let result = cmd_fetch_request(&schema, "Person", &desired, Some("[]"), false).await;
    assert!(matches!(
        result,
        Err(AppError::Graft(GraftError::UnallowedRelation { .. }))
    ));
}

#[tokio::test]
async fn check_schema_lists_models() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", SCHEMA);

    let output = cmd_check_schema(&schema, false).await.expect("check");
    assert!(output.contains("Person (id)"));
    assert!(output.contains("pets"));
    assert!(output.contains("hasMany"));

    let json = cmd_check_schema(&schema, true).await.expect("check");
    let value: serde_json::Value = serde_json::from_str(&json).expect("json output");
    assert_eq!(value["valid"], serde_json::json!(true));
    assert_eq!(value["models"][0]["name"], serde_json::json!("Person"));
}

#[tokio::test]
async fn invalid_schema_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let schema = write(&dir, "graft.toml", "[models.Person]\nid = []\n");

    let result = cmd_check_schema(&schema, true).await;
    assert!(matches!(
        result,
        Err(AppError::Graft(GraftError::InvalidSchema { .. }))
    ));
}
