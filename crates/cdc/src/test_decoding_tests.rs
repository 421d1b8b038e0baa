// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pgferry_core::Lsn;
use std::collections::HashMap;

struct FakePkeys(HashMap<String, Vec<String>>);

impl FakePkeys {
    fn with(nsp: &str, rel: &str, keys: &[&str]) -> Self {
        let mut map = HashMap::new();
        map.insert(
            format!("{nsp}.{rel}"),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        FakePkeys(map)
    }
}

impl PkeyLookup for FakePkeys {
    fn pkey_attrs(&self, nspname: &str, relname: &str) -> Vec<String> {
        self.0
            .get(&format!("{nspname}.{relname}"))
            .cloned()
            .unwrap_or_default()
    }
}

fn change(data: &str) -> RawChange {
    RawChange {
        lsn: Lsn(0x1A2B3C),
        xid: Some(529),
        data: data.to_string(),
    }
}

fn decoder() -> TestDecodingDecoder {
    TestDecodingDecoder
}

#[test]
fn begin_and_commit_envelopes() {
    let begin = decoder().parse_envelope(&change("BEGIN 529")).unwrap();
    assert_eq!(begin.action, StreamAction::Begin);
    assert_eq!(begin.xid, Some(529));
    assert_eq!(begin.commit_lsn, None);

    let commit = decoder()
        .parse_envelope(&change(
            "COMMIT 529 (at 2026-01-01 00:00:00.000000+00)",
        ))
        .unwrap();
    assert_eq!(commit.action, StreamAction::Commit);
    assert_eq!(commit.xid, Some(529));
    assert_eq!(commit.commit_lsn, Some(Lsn(0x1A2B3C)));
    assert_eq!(
        commit.timestamp.as_deref(),
        Some("2026-01-01 00:00:00.000000+00")
    );

    let bare = decoder().parse_envelope(&change("COMMIT 530")).unwrap();
    assert_eq!(bare.xid, Some(530));
    assert_eq!(bare.timestamp, None);
}

#[test]
fn dml_envelopes_drop_the_row_xid() {
    let envelope = decoder()
        .parse_envelope(&change("table public.t: INSERT: id[integer]:3 v[text]:'c'"))
        .unwrap();
    assert_eq!(envelope.action, StreamAction::Insert);
    assert_eq!(envelope.xid, None);
    assert!(!envelope.filter_out);
}

#[test]
fn own_schema_messages_are_filtered_out() {
    let envelope = decoder()
        .parse_envelope(&change(
            "table pgferry.sentinel: UPDATE: apply[boolean]:true",
        ))
        .unwrap();
    assert!(envelope.filter_out);
}

#[test]
fn unrecognized_payload_is_an_error() {
    assert!(matches!(
        decoder().parse_envelope(&change("gibberish")),
        Err(DecodeError::Unrecognized(_))
    ));
}

fn dml_of(data: &str, pkeys: &dyn PkeyLookup) -> DmlMessage {
    let envelope = decoder().parse_envelope(&change(data)).unwrap();
    decoder().parse_dml(&envelope, pkeys).unwrap()
}

#[test]
fn insert_columns_parse_value_shapes() {
    let pkeys = FakePkeys::with("public", "t", &["id"]);
    let message = dml_of(
        "table public.t: INSERT: id[integer]:3 v[text]:'it''s' b[bit(4)]:B'1010' n[text]:null a[integer[]]:'{1,2}'",
        &pkeys,
    );
    assert_eq!(message.nspname, "public");
    assert_eq!(message.relname, "t");
    let tuple = message.new_tuple.unwrap();
    assert_eq!(tuple.columns, vec!["id", "v", "b", "n", "a"]);

    // Raw token.
    assert!(!tuple.values[0].is_quoted);
    assert_eq!(tuple.values[0].str, "3");
    // One round of unescaping.
    assert!(tuple.values[1].is_quoted);
    assert_eq!(tuple.values[1].str, "it's");
    // Bit strings keep their prefix, unquoted.
    assert_eq!(tuple.values[2].str, "B'1010'");
    assert!(!tuple.values[2].is_quoted);
    // null token.
    assert!(tuple.values[3].is_null);
    // Array types survive the bracket scan.
    assert_eq!(tuple.values[4].str, "{1,2}");
}

#[test]
fn delete_parses_old_tuple() {
    let pkeys = FakePkeys::with("public", "t", &["id"]);
    let message = dml_of("table public.t: DELETE: id[integer]:1", &pkeys);
    assert_eq!(message.action, StreamAction::Delete);
    assert!(message.new_tuple.is_none());
    assert_eq!(message.old_tuple.unwrap().columns, vec!["id"]);
}

#[test]
fn update_with_explicit_sections() {
    let pkeys = FakePkeys::with("public", "t", &["id"]);
    let message = dml_of(
        "table public.t: UPDATE: old-key: id[integer]:1 new-tuple: id[integer]:1 v[text]:'x'",
        &pkeys,
    );
    assert_eq!(message.old_tuple.unwrap().columns, vec!["id"]);
    assert_eq!(message.new_tuple.unwrap().columns, vec!["id", "v"]);
}

#[test]
fn update_without_sections_splits_on_pkey() {
    let pkeys = FakePkeys::with("public", "t", &["id"]);
    let message = dml_of(
        "table public.t: UPDATE: id[integer]:1 v[text]:'x'",
        &pkeys,
    );
    let old = message.old_tuple.unwrap();
    let new = message.new_tuple.unwrap();
    assert_eq!(old.columns, vec!["id"]);
    assert_eq!(new.columns, vec!["v"]);
}

#[test]
fn update_with_no_key_side_is_malformed() {
    // No pkey known for the table: every column lands on the SET side.
    let pkeys = FakePkeys::with("public", "other", &["id"]);
    let envelope = decoder()
        .parse_envelope(&change("table public.t: UPDATE: v[text]:'x'"))
        .unwrap();
    assert!(matches!(
        decoder().parse_dml(&envelope, &pkeys),
        Err(DecodeError::UpdateWithoutKey(_))
    ));
}

#[test]
fn truncate_has_no_tuples() {
    let pkeys = FakePkeys::with("public", "t", &["id"]);
    let message = dml_of("table public.t: TRUNCATE: (no-flags)", &pkeys);
    assert_eq!(message.action, StreamAction::Truncate);
    assert!(message.old_tuple.is_none());
    assert!(message.new_tuple.is_none());
}

#[test]
fn quoted_relation_names_unquote() {
    let pkeys = FakePkeys::with("Archive", "Big T", &["id"]);
    let message = dml_of(
        "table \"Archive\".\"Big T\": INSERT: id[integer]:1",
        &pkeys,
    );
    assert_eq!(message.nspname, "Archive");
    assert_eq!(message.relname, "Big T");
}

#[test]
fn quoted_column_names_unquote() {
    let pkeys = FakePkeys::with("public", "t", &["id"]);
    let message = dml_of(
        "table public.t: INSERT: \"my col\"[text]:'v' id[integer]:1",
        &pkeys,
    );
    assert_eq!(
        message.new_tuple.unwrap().columns,
        vec!["my col", "id"]
    );
}
