// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pgferry_core::Lsn;

struct NoPkeys;

impl PkeyLookup for NoPkeys {
    fn pkey_attrs(&self, _nspname: &str, _relname: &str) -> Vec<String> {
        Vec::new()
    }
}

fn change(data: &str) -> RawChange {
    RawChange {
        lsn: Lsn(0x2000),
        xid: Some(77),
        data: data.to_string(),
    }
}

fn decoder() -> Wal2jsonDecoder {
    Wal2jsonDecoder
}

#[test]
fn begin_commit_envelopes() {
    let begin = decoder()
        .parse_envelope(&change("{\"action\":\"B\",\"xid\":77}"))
        .unwrap();
    assert_eq!(begin.action, StreamAction::Begin);
    assert_eq!(begin.xid, Some(77));

    let commit = decoder()
        .parse_envelope(&change(
            "{\"action\":\"C\",\"xid\":77,\"timestamp\":\"2026-01-01 00:00:00.000000+00\"}",
        ))
        .unwrap();
    assert_eq!(commit.commit_lsn, Some(Lsn(0x2000)));
    assert!(commit.timestamp.is_some());
}

#[test]
fn insert_parses_typed_values() {
    let envelope = decoder()
        .parse_envelope(&change(
            "{\"action\":\"I\",\"schema\":\"public\",\"table\":\"t\",\
             \"columns\":[{\"name\":\"id\",\"type\":\"integer\",\"value\":3},\
                          {\"name\":\"v\",\"type\":\"text\",\"value\":\"c\"},\
                          {\"name\":\"n\",\"type\":\"text\",\"value\":null}]}",
        ))
        .unwrap();
    let message = decoder().parse_dml(&envelope, &NoPkeys).unwrap();
    let tuple = message.new_tuple.unwrap();
    assert_eq!(tuple.columns, vec!["id", "v", "n"]);
    assert_eq!(tuple.values[0].str, "3");
    assert!(!tuple.values[0].is_quoted);
    assert!(tuple.values[1].is_quoted);
    assert!(tuple.values[2].is_null);
}

#[test]
fn update_requires_identity() {
    let envelope = decoder()
        .parse_envelope(&change(
            "{\"action\":\"U\",\"schema\":\"public\",\"table\":\"t\",\
             \"columns\":[{\"name\":\"v\",\"value\":\"x\"}]}",
        ))
        .unwrap();
    assert!(matches!(
        decoder().parse_dml(&envelope, &NoPkeys),
        Err(DecodeError::UpdateWithoutKey(_))
    ));
}

#[test]
fn update_splits_identity_and_columns() {
    let envelope = decoder()
        .parse_envelope(&change(
            "{\"action\":\"U\",\"schema\":\"public\",\"table\":\"t\",\
             \"columns\":[{\"name\":\"id\",\"value\":1},{\"name\":\"v\",\"value\":\"x\"}],\
             \"identity\":[{\"name\":\"id\",\"value\":1}]}",
        ))
        .unwrap();
    let message = decoder().parse_dml(&envelope, &NoPkeys).unwrap();
    assert_eq!(message.old_tuple.unwrap().columns, vec!["id"]);
    assert_eq!(message.new_tuple.unwrap().columns, vec!["id", "v"]);
}

#[test]
fn own_schema_is_filtered() {
    let envelope = decoder()
        .parse_envelope(&change(
            "{\"action\":\"U\",\"schema\":\"pgferry\",\"table\":\"sentinel\",\
             \"columns\":[{\"name\":\"apply\",\"value\":true}]}",
        ))
        .unwrap();
    assert!(envelope.filter_out);
}

#[test]
fn non_json_payload_is_unrecognized() {
    assert!(matches!(
        decoder().parse_envelope(&change("BEGIN 77")),
        Err(DecodeError::Unrecognized(_))
    ));
}
