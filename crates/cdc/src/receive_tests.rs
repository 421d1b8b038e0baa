// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_decoding::TestDecodingDecoder;
use async_trait::async_trait;
use pgferry_core::{FakeClock, StreamAction};
use pgferry_pgsql::RawChange;
use std::collections::VecDeque;

const SEG: u64 = 16 * 1024 * 1024;

struct ScriptedSource {
    batches: VecDeque<Result<Vec<RawChange>, ()>>,
    reconnects: usize,
}

impl ScriptedSource {
    fn new(batches: Vec<Result<Vec<RawChange>, ()>>) -> Self {
        ScriptedSource {
            batches: batches.into(),
            reconnects: 0,
        }
    }
}

#[async_trait]
impl ChangeSource for ScriptedSource {
    async fn fetch(&mut self, _max: u32) -> Result<Vec<RawChange>, PgError> {
        match self.batches.pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(())) => Err(PgError::Unexpected {
                query: "fetch".to_string(),
                detail: "scripted disconnect".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn confirmed_flush_lsn(&mut self) -> Result<Lsn, PgError> {
        Ok(Lsn::ZERO)
    }

    async fn reconnect(&mut self) -> Result<(), PgError> {
        self.reconnects += 1;
        Ok(())
    }
}

fn change(lsn: u64, data: &str) -> RawChange {
    RawChange {
        lsn: Lsn(lsn),
        xid: Some(529),
        data: data.to_string(),
    }
}

fn stage(
    dir: &std::path::Path,
    batches: Vec<Result<Vec<RawChange>, ()>>,
    endpos: Option<Lsn>,
) -> ReceiveStage<ScriptedSource, FakeClock> {
    let writer = SegmentWriter::new(dir, 1, SEG);
    let lsn_file = LsnFile::open(&dir.join("lsn.json"), Lsn(0x50)).unwrap();
    ReceiveStage::new(
        ScriptedSource::new(batches),
        Box::new(TestDecodingDecoder),
        writer,
        lsn_file,
        FakeClock::default(),
        ReceiveConfig {
            poll_interval: Duration::from_millis(1),
            retry_backoff: Duration::from_millis(1),
            endpos,
            ..ReceiveConfig::default()
        },
    )
}

fn read_envelopes(path: &std::path::Path) -> Vec<Envelope> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn writes_envelopes_and_advances_cursors() {
    let tmp = tempfile::tempdir().unwrap();
    let mut stage = stage(
        tmp.path(),
        vec![Ok(vec![
            change(0x100, "BEGIN 529"),
            change(0x110, "table public.t: INSERT: id[integer]:3 v[text]:'c'"),
            change(0x120, "COMMIT 529 (at 2026-01-01 00:00:00.000000+00)"),
        ])],
        None,
    );

    let tick = stage.run_once().await.unwrap();
    assert_eq!(tick.wrote, 3);
    assert_eq!(tick.write_lsn, Lsn(0x120));
    assert_eq!(tick.flush_lsn, Lsn(0x120));
    assert_eq!(stage.tracking().write_lsn, Lsn(0x120));

    let files = stage.finish().unwrap();
    let lines = read_envelopes(&files[0]);
    // switch marker + the three messages
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[1].action, StreamAction::Begin);
    assert_eq!(lines[3].commit_lsn, Some(Lsn(0x120)));
}

#[tokio::test]
async fn own_schema_changes_never_reach_the_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut stage = stage(
        tmp.path(),
        vec![Ok(vec![
            change(0x100, "table pgferry.sentinel: UPDATE: apply[boolean]:true"),
            change(0x110, "table public.t: INSERT: id[integer]:1"),
        ])],
        None,
    );
    let tick = stage.run_once().await.unwrap();
    assert_eq!(tick.wrote, 1);

    let files = stage.finish().unwrap();
    let lines = read_envelopes(&files[0]);
    assert!(lines.iter().all(|e| !e.filter_out));
    assert_eq!(lines.len(), 2); // switch + the public.t insert
}

#[tokio::test]
async fn idle_rounds_synthesize_keepalives() {
    let tmp = tempfile::tempdir().unwrap();
    let mut stage = stage(tmp.path(), vec![Ok(vec![])], None);
    let tick = stage.run_once().await.unwrap();
    assert_eq!(tick.wrote, 1);

    let files = stage.finish().unwrap();
    let lines = read_envelopes(&files[0]);
    assert_eq!(lines[1].action, StreamAction::Keepalive);
    // Idle keepalives never move backwards past startpos.
    assert_eq!(lines[1].lsn, Lsn(0x50));
    assert!(lines[1].timestamp.is_some());
}

#[tokio::test]
async fn source_errors_reconnect_and_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let mut stage = stage(
        tmp.path(),
        vec![
            Err(()),
            Ok(vec![change(0x100, "table public.t: INSERT: id[integer]:1")]),
        ],
        None,
    );

    let tick = stage.run_once().await.unwrap();
    assert!(tick.retrying);
    assert_eq!(stage.source.reconnects, 1);

    let tick = stage.run_once().await.unwrap();
    assert!(!tick.retrying);
    assert_eq!(tick.wrote, 1);
}

#[tokio::test]
async fn endpos_closes_the_stream() {
    let tmp = tempfile::tempdir().unwrap();
    let mut stage = stage(
        tmp.path(),
        vec![Ok(vec![change(
            0x200,
            "table public.t: INSERT: id[integer]:1",
        )])],
        Some(Lsn(0x200)),
    );
    let tick = stage.run_once().await.unwrap();
    assert!(tick.reached_endpos);
    // The current file was closed and handed over for transform.
    assert_eq!(tick.closed.len(), 1);
}
