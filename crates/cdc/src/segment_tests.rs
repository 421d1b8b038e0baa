// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pgferry_core::StreamAction;

const SEG: u64 = 16 * 1024 * 1024;

fn envelope(lsn: u64) -> Envelope {
    Envelope {
        action: StreamAction::Insert,
        xid: None,
        lsn: Lsn(lsn),
        commit_lsn: None,
        timestamp: None,
        message: Some(serde_json::Value::String("payload".to_string())),
        filter_out: false,
    }
}

fn read_lines(path: &Path) -> Vec<Envelope> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn names_derive_from_timeline_and_segment_start() {
    assert_eq!(
        segment_file_name(1, Lsn(SEG + 42), SEG, "json"),
        "00000001-0000000001000000.json"
    );
    assert_eq!(
        segment_file_name(3, Lsn(10), SEG, "sql"),
        "00000003-0000000000000000.sql"
    );
}

#[test]
fn first_line_of_every_file_is_a_switch_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = SegmentWriter::new(tmp.path(), 1, SEG);
    writer.append(&envelope(100)).unwrap();
    writer.close_current().unwrap();

    let files = writer.take_closed();
    assert_eq!(files.len(), 1);
    let lines = read_lines(&files[0]);
    assert_eq!(lines[0].action, StreamAction::SwitchWal);
    assert_eq!(lines[1].action, StreamAction::Insert);
}

#[test]
fn crossing_a_boundary_rotates_and_marks_the_new_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = SegmentWriter::new(tmp.path(), 1, SEG);
    writer.append(&envelope(100)).unwrap();
    writer.append(&envelope(SEG + 5)).unwrap();

    // The first file is closed and handed over for transform.
    let closed = writer.take_closed();
    assert_eq!(closed.len(), 1);
    assert!(closed[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("0000000000000000.json"));

    // The new file starts with SWITCH WAL at the crossing LSN.
    let current = writer.current_path().unwrap().to_path_buf();
    writer.close_current().unwrap();
    let lines = read_lines(&current);
    assert_eq!(lines[0].action, StreamAction::SwitchWal);
    assert_eq!(lines[0].lsn, Lsn(SEG + 5));
}

#[test]
fn latest_symlink_tracks_the_current_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = SegmentWriter::new(tmp.path(), 1, SEG);
    writer.append(&envelope(100)).unwrap();

    let link = tmp.path().join("latest");
    let target = std::fs::read_link(&link).unwrap();
    assert_eq!(
        target.to_string_lossy(),
        "00000001-0000000000000000.json"
    );

    writer.append(&envelope(SEG + 5)).unwrap();
    let target = std::fs::read_link(&link).unwrap();
    assert_eq!(
        target.to_string_lossy(),
        "00000001-0000000001000000.json"
    );
}

#[test]
fn written_lsn_is_monotonic_and_flush_reports_it() {
    let tmp = tempfile::tempdir().unwrap();
    let mut writer = SegmentWriter::new(tmp.path(), 1, SEG);
    writer.append(&envelope(100)).unwrap();
    writer.append(&envelope(200)).unwrap();
    assert_eq!(writer.flush().unwrap(), Lsn(200));
}

#[test]
fn resume_appends_to_the_same_segment_file() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut writer = SegmentWriter::new(tmp.path(), 1, SEG);
        writer.append(&envelope(100)).unwrap();
        writer.flush().unwrap();
    }
    let mut writer = SegmentWriter::new(tmp.path(), 1, SEG);
    writer.append(&envelope(200)).unwrap();
    let current = writer.current_path().unwrap().to_path_buf();
    writer.close_current().unwrap();

    let lines = read_lines(&current);
    // Old content survives; the reopened file gains its own switch line.
    let lsns: Vec<u64> = lines.iter().map(|e| e.lsn.0).collect();
    assert_eq!(lsns, vec![100, 100, 200, 200]);
}
