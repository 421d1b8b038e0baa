// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pgferry_core::{IndexConstraint, SourceAttr, TablePart};

fn table(oid: u32, nsp: &str, rel: &str, bytes: u64) -> SourceTable {
    SourceTable {
        oid: Oid(oid),
        nspname: nsp.to_string(),
        relname: rel.to_string(),
        reltuples: 100,
        bytes,
        relpages: 10,
        amname: "heap".to_string(),
        attrs: vec![SourceAttr {
            attnum: 1,
            name: "id".to_string(),
            type_oid: 23,
            is_pkey: true,
        }],
        parts: vec![TablePart::whole()],
    }
}

fn index(oid: u32, table_oid: u32, name: &str) -> SourceIndex {
    SourceIndex {
        oid: Oid(oid),
        table_oid: Oid(table_oid),
        nspname: "public".to_string(),
        relname: name.to_string(),
        definition: format!("CREATE UNIQUE INDEX {name} ON public.t USING btree (id)"),
        is_unique: true,
        constraint: Some(IndexConstraint {
            oid: Oid(oid + 1000),
            name: name.to_string(),
            definition: "PRIMARY KEY (id)".to_string(),
            is_primary: true,
            is_unique: true,
        }),
    }
}

fn populated() -> CatalogStore {
    let store = CatalogStore::new();
    store
        .populate(SchemaSnapshot {
            snapshot_id: Some("00000003-00000002-1".to_string()),
            schemas: vec!["public".to_string()],
            tables: vec![
                table(10, "public", "small", 100),
                table(20, "public", "big", 9000),
                table(30, "public", "mid", 100),
            ],
            indexes: vec![index(100, 20, "big_pkey")],
            ..SchemaSnapshot::default()
        })
        .unwrap();
    store
}

#[test]
fn tables_are_ordered_largest_first_then_oid() {
    let store = populated();
    let oids: Vec<u32> = store.tables().iter().map(|t| t.oid.0).collect();
    // big (9000) first; small/mid tie at 100 broken by ascending OID.
    assert_eq!(oids, vec![20, 10, 30]);
}

#[test]
fn lookups_by_oid_and_name_agree() {
    let store = populated();
    let by_oid = store.table_by_oid(Oid(20)).unwrap();
    let by_name = store.table_by_name("public", "big").unwrap();
    assert_eq!(by_oid, by_name);
    assert!(store.table_by_oid(Oid(999)).is_none());
}

#[test]
fn pkey_attrs_come_from_the_catalog() {
    let store = populated();
    assert_eq!(store.pkey_attrs("public", "big"), vec!["id".to_string()]);
    assert!(store.pkey_attrs("public", "missing").is_empty());
}

#[test]
fn indexes_of_table() {
    let store = populated();
    let indexes = store.indexes_of(Oid(20));
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].relname, "big_pkey");
    assert!(store.indexes_of(Oid(10)).is_empty());
}

#[test]
fn duplicate_oid_is_rejected() {
    let store = CatalogStore::new();
    let err = store
        .populate(SchemaSnapshot {
            tables: vec![table(10, "public", "a", 1), table(10, "public", "b", 2)],
            ..SchemaSnapshot::default()
        })
        .unwrap_err();
    assert!(matches!(err, CatalogError::DuplicateOid(Oid(10))));
}

#[test]
fn persist_and_load_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("schema.json");
    let spec = FilterSpec::default();

    let store = populated();
    {
        let mut inner = store.inner.lock();
        inner.snapshot.filter_fingerprint = CatalogStore::filter_fingerprint(&spec);
    }
    store.persist(&path).unwrap();

    let reloaded = CatalogStore::new();
    reloaded.load(&path, &spec).unwrap();
    assert_eq!(reloaded.tables().len(), 3);
    assert_eq!(
        reloaded.snapshot_id().as_deref(),
        Some("00000003-00000002-1")
    );
}

#[test]
fn load_refuses_changed_filter() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("schema.json");
    let original = FilterSpec::default();

    let store = populated();
    {
        let mut inner = store.inner.lock();
        inner.snapshot.filter_fingerprint = CatalogStore::filter_fingerprint(&original);
    }
    store.persist(&path).unwrap();

    let changed = FilterSpec {
        exclude_schemas: vec!["archive".to_string()],
        ..FilterSpec::default()
    };
    let err = CatalogStore::new().load(&path, &changed).unwrap_err();
    assert!(matches!(err, CatalogError::FilterChanged { .. }));
}

#[test]
fn filtered_out_checks_oid_and_restore_name() {
    let store = CatalogStore::new();
    let mut filter = FilterSet::default();
    filter.insert_oid(Oid(42));
    filter.insert_restore_name("archive t postgres");
    store
        .populate(SchemaSnapshot {
            filter,
            ..SchemaSnapshot::default()
        })
        .unwrap();
    assert!(store.is_filtered_out(Oid(42), "public t postgres"));
    assert!(store.is_filtered_out(Oid(1), "archive t postgres"));
    assert!(!store.is_filtered_out(Oid(1), "public t postgres"));
}

#[test]
fn persist_requires_population() {
    let tmp = tempfile::tempdir().unwrap();
    let err = CatalogStore::new()
        .persist(&tmp.path().join("schema.json"))
        .unwrap_err();
    assert!(matches!(err, CatalogError::NotPopulated));
}
