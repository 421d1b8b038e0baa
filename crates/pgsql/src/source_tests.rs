// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn changes_query_without_options() {
    assert_eq!(
        changes_query("pgferry", 500, &[]),
        "SELECT lsn, xid, data FROM pg_logical_slot_get_changes('pgferry', NULL, 500)"
    );
}

#[test]
fn changes_query_renders_option_pairs() {
    let query = changes_query(
        "pgferry",
        100,
        &[("include-xids", "1"), ("include-timestamp", "1")],
    );
    assert_eq!(
        query,
        "SELECT lsn, xid, data FROM pg_logical_slot_get_changes(\
         'pgferry', NULL, 100, 'include-xids', '1', 'include-timestamp', '1')"
    );
}

#[test]
fn slot_names_are_quoted_as_literals() {
    let query = changes_query("odd'slot", 1, &[]);
    assert!(query.contains("'odd''slot'"));
}
