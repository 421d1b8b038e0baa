// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    begin = { StreamAction::Begin, 'B' },
    commit = { StreamAction::Commit, 'C' },
    insert = { StreamAction::Insert, 'I' },
    update = { StreamAction::Update, 'U' },
    delete = { StreamAction::Delete, 'D' },
    truncate = { StreamAction::Truncate, 'T' },
    message = { StreamAction::Message, 'M' },
    switch_wal = { StreamAction::SwitchWal, 'X' },
    keepalive = { StreamAction::Keepalive, 'K' },
)]
fn action_codes_round_trip(action: StreamAction, code: char) {
    assert_eq!(action.code(), code);
    assert_eq!(StreamAction::from_code(code), Some(action));
}

#[test]
fn envelope_wire_format_matches_contract() {
    let envelope = Envelope {
        action: StreamAction::Insert,
        xid: None,
        lsn: "0/1A2B3C".parse().unwrap(),
        commit_lsn: Some("0/1A2B44".parse().unwrap()),
        timestamp: Some("2026-01-01 00:00:00.000000+00".to_string()),
        message: Some(serde_json::Value::String(
            "table public.t: INSERT: id[integer]:3".to_string(),
        )),
        filter_out: false,
    };
    let line = serde_json::to_string(&envelope).unwrap();
    assert!(line.starts_with("{\"action\":\"I\""));
    assert!(line.contains("\"lsn\":\"0/1A2B3C\""));
    assert!(line.contains("\"commitLsn\":\"0/1A2B44\""));
    // Absent xid and false filterOut stay off the wire entirely.
    assert!(!line.contains("xid"));
    assert!(!line.contains("filterOut"));

    let back: Envelope = serde_json::from_str(&line).unwrap();
    assert_eq!(back, envelope);
}

#[test]
fn synthetic_envelopes_carry_null_message() {
    let switch = Envelope::switch_wal(Lsn(0x100_0000));
    let line = serde_json::to_string(&switch).unwrap();
    assert!(line.contains("\"action\":\"X\""));
    assert!(line.contains("\"message\":null"));

    let keepalive = Envelope::keepalive(Lsn(42), "2026-01-01 00:00:00.000000+00");
    assert_eq!(keepalive.action, StreamAction::Keepalive);
    assert!(keepalive.timestamp.is_some());
}

#[test]
fn rejects_unknown_action() {
    let err = serde_json::from_str::<Envelope>(
        "{\"action\":\"Z\",\"lsn\":\"0/0\",\"message\":null}",
    );
    assert!(err.is_err());
}

#[test]
fn tuple_preserves_column_order() {
    let mut tuple = Tuple::default();
    tuple.push("id", TupleValue::raw(Some(23), "3"));
    tuple.push("v", TupleValue::quoted(Some(25), "it's"));
    assert_eq!(tuple.columns, vec!["id", "v"]);
    assert!(!tuple.values[0].is_quoted);
    assert!(tuple.values[1].is_quoted);
    assert_eq!(tuple.values[1].str, "it's");
}
