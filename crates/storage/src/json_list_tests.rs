// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde::Deserialize;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    id: String,
    count: u32,
}

fn record(id: &str, count: u32) -> Record {
    Record {
        id: id.to_string(),
        count,
    }
}

#[test]
fn missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let loaded: Vec<Record> = load_list(&dir.path().join("absent.json")).unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn save_then_load_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");

    save_list(&path, &[record("b", 2), record("a", 1)]).unwrap();
    let loaded: Vec<Record> = load_list(&path).unwrap();

    assert_eq!(loaded, vec![record("b", 2), record("a", 1)]);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn save_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/data/records.json");

    save_list(&path, &[record("x", 0)]).unwrap();
    assert!(path.exists());
}

#[test]
fn save_replaces_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");

    save_list(&path, &[record("a", 1), record("b", 2)]).unwrap();
    save_list::<Record>(&path, &[]).unwrap();

    let loaded: Vec<Record> = load_list(&path).unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn corrupt_file_is_a_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");
    std::fs::write(&path, "[{\"id\": ").unwrap();

    let err = load_list::<Record>(&path).unwrap_err();
    assert!(matches!(err, StoreError::Json(_)));
}
