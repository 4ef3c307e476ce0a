//! Tests for state persistence and validation.

use super::*;
use crate::models::{ColumnDescriptor, TableDescriptor};
use tempfile::TempDir;

fn fingerprint(name: &str, row_count: u64) -> TableFingerprint {
    let table = TableDescriptor::new(
        name,
        vec![
            ColumnDescriptor::new("id", "INTEGER", false, 0),
            ColumnDescriptor::new("label", "TEXT", true, 1),
        ],
        row_count,
    );
    TableFingerprint::capture(&table, Utc::now()).unwrap()
}

fn sample_state() -> SchemaState {
    let mut state = SchemaState::new("app", Some("main".to_string()));
    state.insert(fingerprint("users", 100));
    state.insert(fingerprint("orders", 2500));
    state
}

fn valid_hash() -> String {
    fingerprint("x", 0).structure_hash.to_hex()
}

fn document(version: &str, tables: &str) -> String {
    format!(
        r#"{{
            "version": {version},
            "database_name": "app",
            "schema_name": null,
            "generated_at": "2024-05-01T12:00:00Z",
            "tables": {tables}
        }}"#
    )
}

// =============================================================================
// Document validation
// =============================================================================

#[test]
fn test_json_round_trip_preserves_state() {
    let state = sample_state();
    let json = state.to_json().unwrap();
    let parsed = SchemaState::from_json(&json).unwrap();
    assert_eq!(parsed, state);
}

#[test]
fn test_document_uses_documented_field_names() {
    let json = sample_state().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["version"], 1);
    assert_eq!(value["database_name"], "app");
    assert_eq!(value["schema_name"], "main");
    assert!(value["generated_at"].is_string());
    let users = &value["tables"]["users"];
    assert_eq!(users["row_count"], 100);
    assert!(users["structure_hash"].as_str().unwrap().len() == 64);
    assert!(users["last_profiled"].is_string());
}

#[test]
fn test_unknown_version_rejected() {
    let json = document("999", "{}");
    assert_eq!(
        SchemaState::from_json(&json),
        Err(InvalidStateReason::UnsupportedVersion("999".to_string()))
    );
}

#[test]
fn test_missing_version_rejected() {
    let json = r#"{"database_name": "app", "tables": {}}"#;
    assert!(matches!(
        SchemaState::from_json(json),
        Err(InvalidStateReason::UnsupportedVersion(_))
    ));
}

#[test]
fn test_non_object_tables_rejected() {
    let json = document("1", "[]");
    assert_eq!(
        SchemaState::from_json(&json),
        Err(InvalidStateReason::TablesNotObject)
    );
}

#[test]
fn test_negative_row_count_rejected() {
    let tables = format!(
        r#"{{ "users": {{ "structure_hash": "{}", "row_count": -5, "last_profiled": "2024-05-01T12:00:00Z" }} }}"#,
        valid_hash()
    );
    let json = document("1", &tables);
    assert_eq!(
        SchemaState::from_json(&json),
        Err(InvalidStateReason::NegativeRowCount("users".to_string()))
    );
}

#[test]
fn test_duplicate_table_rejected() {
    let entry = format!(
        r#"{{ "structure_hash": "{}", "row_count": 1, "last_profiled": "2024-05-01T12:00:00Z" }}"#,
        valid_hash()
    );
    let tables = format!(r#"{{ "users": {entry}, "users": {entry} }}"#);
    let json = document("1", &tables);
    assert_eq!(
        SchemaState::from_json(&json),
        Err(InvalidStateReason::DuplicateTable("users".to_string()))
    );
}

#[test]
fn test_bad_hash_rejected() {
    let tables = r#"{ "users": { "structure_hash": "zz", "row_count": 1, "last_profiled": "2024-05-01T12:00:00Z" } }"#;
    let json = document("1", tables);
    assert!(matches!(
        SchemaState::from_json(&json),
        Err(InvalidStateReason::Malformed(_))
    ));
}

#[test]
fn test_garbage_rejected() {
    assert!(matches!(
        SchemaState::from_json("{ not json"),
        Err(InvalidStateReason::Malformed(_))
    ));
}

#[test]
fn test_state_load_into_state() {
    assert!(StateLoad::Loaded(sample_state()).into_state().is_some());
    assert!(StateLoad::NotFound.into_state().is_none());
    assert!(
        StateLoad::Invalid(InvalidStateReason::TablesNotObject)
            .into_state()
            .is_none()
    );
}

// =============================================================================
// File store
// =============================================================================

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path().join("state.json"));
    assert_eq!(store.load().await, StateLoad::NotFound);
}

#[tokio::test]
async fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path().join("nested").join("state.json"));
    let state = sample_state();

    store.save(&state).await.unwrap();
    assert_eq!(store.load().await, StateLoad::Loaded(state));
}

#[tokio::test]
async fn test_save_replaces_previous_state_and_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path().join("state.json"));

    store.save(&sample_state()).await.unwrap();

    let mut smaller = SchemaState::new("app", None);
    smaller.insert(fingerprint("users", 120));
    store.save(&smaller).await.unwrap();

    let loaded = store.load().await.into_state().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.get("users").unwrap().row_count_estimate, 120);

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["state.json".to_string()]);
}

#[tokio::test]
async fn test_invalid_file_is_invalid_not_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, document("999", "{}")).unwrap();

    let store = FileStateStore::new(&path);
    assert!(matches!(
        store.load().await,
        StateLoad::Invalid(InvalidStateReason::UnsupportedVersion(_))
    ));
}

#[tokio::test]
async fn test_failed_save_keeps_previous_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let store = FileStateStore::new(&path);
    let state = sample_state();
    store.save(&state).await.unwrap();

    // A directory sitting where the state's parent should be makes every
    // write fail.
    let blocked = FileStateStore::new(path.join("child.json"));
    let result = blocked.save(&state).await;
    assert!(matches!(result, Err(ProfilerError::StoreWrite { .. })));

    assert_eq!(store.load().await, StateLoad::Loaded(state));
}
