// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde::Deserialize;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    n: u32,
}

#[test]
fn atomic_write_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a/b/record.json");
    atomic_write_json(&path, &Record { n: 7 }).unwrap();
    assert_eq!(read_json::<Record>(&path).unwrap(), Some(Record { n: 7 }));
}

#[test]
fn atomic_write_leaves_no_tmp_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("record.json");
    atomic_write_json(&path, &Record { n: 1 }).unwrap();
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn read_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        read_json::<Record>(&dir.path().join("nope.json")).unwrap(),
        None
    );
    assert_eq!(read_text(&dir.path().join("nope")).unwrap(), None);
}

#[test]
fn read_text_trims() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slot");
    atomic_write_text(&path, "pgferry\n").unwrap();
    assert_eq!(read_text(&path).unwrap().as_deref(), Some("pgferry"));
}

#[test]
fn overwrite_replaces_whole_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("record.json");
    atomic_write_json(&path, &Record { n: 1 }).unwrap();
    atomic_write_json(&path, &Record { n: 2 }).unwrap();
    assert_eq!(read_json::<Record>(&path).unwrap(), Some(Record { n: 2 }));
}
