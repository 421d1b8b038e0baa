// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filter honesty: every entry whose OID or restore name is filtered is
//! commented out of the restore list, and nothing else is.

use pgferry_core::{FilterSet, Oid};
use pgferry_schema::{render_list, ListFilter, ListLine};
use pgferry_store::catalog_store::SchemaSnapshot;
use pgferry_store::{CatalogStore, MemRunStore};
use std::collections::HashSet;

const LISTING: &str = "\
;
; Selected TOC Entries:
;
3; 2615 16500 SCHEMA - archive postgres
215; 1259 16387 TABLE public t postgres
216; 1259 16501 TABLE archive t postgres
4; 1259 16502 SEQUENCE archive t_id_seq postgres
301; 1259 16400 INDEX public t_pkey postgres
";

#[test]
fn excluded_schema_objects_are_commented_out() {
    let mut filter = FilterSet::default();
    // Everything the archive schema owns was filtered during fetch.
    filter.insert_restore_name("- archive postgres");
    filter.insert_oid(Oid(16501));
    filter.insert_oid(Oid(16502));

    let catalog = CatalogStore::new();
    catalog
        .populate(SchemaSnapshot {
            filter,
            ..SchemaSnapshot::default()
        })
        .unwrap();

    let run_store = MemRunStore::new();
    let existing = HashSet::new();
    let list_filter = ListFilter {
        run_store: &run_store,
        catalog: &catalog,
        existing_schemas: &existing,
        skip_extension_comments: false,
    };

    let rendered = render_list(&list_filter.filter_listing(LISTING));
    // archive.* never reaches the target.
    assert!(rendered.contains(";3; 2615 16500 SCHEMA - archive postgres"));
    assert!(rendered.contains(";216; 1259 16501 TABLE archive t postgres"));
    assert!(rendered.contains(";4; 1259 16502 SEQUENCE archive t_id_seq postgres"));
    // public.t and its index are untouched.
    assert!(rendered.contains("\n215; 1259 16387 TABLE public t postgres"));
    assert!(rendered.contains("\n301; 1259 16400 INDEX public t_pkey postgres"));
}

#[test]
fn no_filter_means_no_commenting() {
    let catalog = CatalogStore::new();
    catalog.populate(SchemaSnapshot::default()).unwrap();
    let run_store = MemRunStore::new();
    let existing = HashSet::new();
    let list_filter = ListFilter {
        run_store: &run_store,
        catalog: &catalog,
        existing_schemas: &existing,
        skip_extension_comments: false,
    };
    let lines = list_filter.filter_listing(LISTING);
    assert!(lines
        .iter()
        .all(|line| !matches!(line, ListLine::Skip(_, _))));
}
