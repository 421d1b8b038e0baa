// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end change-stream flow against a scripted source: receive
//! writes envelope files, transform renders the SQL that apply would
//! execute, one line per envelope.

use async_trait::async_trait;
use pgferry_cdc::{
    transform_file, ReceiveConfig, ReceiveStage, SegmentWriter, TestDecodingDecoder,
};
use pgferry_core::{FakeClock, Lsn};
use pgferry_pgsql::{ChangeSource, PgError, RawChange};
use pgferry_store::LsnFile;
use std::collections::VecDeque;

struct ScriptedSource {
    batches: VecDeque<Vec<RawChange>>,
}

#[async_trait]
impl ChangeSource for ScriptedSource {
    async fn fetch(&mut self, _max: u32) -> Result<Vec<RawChange>, PgError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    async fn confirmed_flush_lsn(&mut self) -> Result<Lsn, PgError> {
        Ok(Lsn::ZERO)
    }
}

struct Pkeys;

impl pgferry_cdc::PkeyLookup for Pkeys {
    fn pkey_attrs(&self, nspname: &str, relname: &str) -> Vec<String> {
        if nspname == "public" && relname == "t" {
            vec!["id".to_string()]
        } else {
            Vec::new()
        }
    }
}

fn change(lsn: u64, data: &str) -> RawChange {
    RawChange {
        lsn: Lsn(lsn),
        xid: Some(529),
        data: data.to_string(),
    }
}

#[tokio::test]
async fn inserted_row_travels_from_stream_to_sql() {
    let tmp = tempfile::tempdir().unwrap();
    let source = ScriptedSource {
        batches: vec![vec![
            change(0x100, "BEGIN 529"),
            change(0x110, "table public.t: INSERT: id[integer]:3 v[text]:'c'"),
            change(0x120, "COMMIT 529 (at 2026-01-01 00:00:00.000000+00)"),
        ]]
        .into(),
    };

    let mut receive = ReceiveStage::new(
        source,
        Box::new(TestDecodingDecoder),
        SegmentWriter::new(tmp.path(), 1, 16 * 1024 * 1024),
        LsnFile::open(&tmp.path().join("lsn.json"), Lsn(0x100)).unwrap(),
        FakeClock::default(),
        ReceiveConfig::default(),
    );

    let tick = receive.run_once().await.unwrap();
    assert_eq!(tick.wrote, 3);
    let closed = receive.finish().unwrap();
    assert_eq!(closed.len(), 1);

    // Transform the closed segment the way catchup does.
    let sql_path = closed[0].with_extension("sql");
    let lines = transform_file(&closed[0], &sql_path, &TestDecodingDecoder, &Pkeys).unwrap();
    // switch marker + BEGIN + INSERT + COMMIT
    assert_eq!(lines, 4);

    let sql = std::fs::read_to_string(&sql_path).unwrap();
    let sql_lines: Vec<&str> = sql.lines().collect();
    assert!(sql_lines[0].starts_with("-- SWITCH WAL"));
    assert_eq!(
        sql_lines[1],
        "-- BEGIN xid=529 lsn=0/100 commitLsn=0/120"
    );
    assert_eq!(sql_lines[2], "INSERT INTO public.t (id, v) VALUES (3, 'c');");
    assert_eq!(
        sql_lines[3],
        "-- COMMIT xid=529 lsn=0/120 commitLsn=0/120 ts=2026-01-01 00:00:00.000000+00"
    );
}

#[tokio::test]
async fn truncate_and_update_render_target_sql() {
    let tmp = tempfile::tempdir().unwrap();
    let source = ScriptedSource {
        batches: vec![vec![
            change(0x200, "BEGIN 530"),
            change(0x210, "table public.t: UPDATE: id[integer]:1 v[text]:'x'"),
            change(0x220, "table public.t: TRUNCATE: (no-flags)"),
            change(0x230, "COMMIT 530 (at 2026-01-01 00:00:01.000000+00)"),
        ]]
        .into(),
    };

    let mut receive = ReceiveStage::new(
        source,
        Box::new(TestDecodingDecoder),
        SegmentWriter::new(tmp.path(), 1, 16 * 1024 * 1024),
        LsnFile::open(&tmp.path().join("lsn.json"), Lsn(0x200)).unwrap(),
        FakeClock::default(),
        ReceiveConfig::default(),
    );
    receive.run_once().await.unwrap();
    let closed = receive.finish().unwrap();

    let sql_path = closed[0].with_extension("sql");
    transform_file(&closed[0], &sql_path, &TestDecodingDecoder, &Pkeys).unwrap();
    let sql = std::fs::read_to_string(&sql_path).unwrap();
    assert!(sql.contains("UPDATE public.t SET v = 'x' WHERE id = 1;"));
    assert!(sql.contains("TRUNCATE ONLY public.t;"));
}
