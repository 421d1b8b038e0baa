// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fresh_file_starts_from_startpos() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lsn.json");
    let file = LsnFile::open(&path, Lsn(0x100)).unwrap();
    assert_eq!(file.tracking().startpos, Lsn(0x100));
    assert_eq!(file.tracking().write_lsn, Lsn::ZERO);
}

#[test]
fn advance_persists_and_reloads() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lsn.json");
    {
        let mut file = LsnFile::open(&path, Lsn(0x100)).unwrap();
        file.advance(Some(Lsn(0x200)), Some(Lsn(0x180)), None)
            .unwrap();
    }
    let file = LsnFile::open(&path, Lsn::ZERO).unwrap();
    // Reload keeps the persisted startpos, not the caller's.
    assert_eq!(file.tracking().startpos, Lsn(0x100));
    assert_eq!(file.tracking().write_lsn, Lsn(0x200));
    assert_eq!(file.tracking().flush_lsn, Lsn(0x180));
}

#[test]
fn regression_is_rejected_and_not_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lsn.json");
    let mut file = LsnFile::open(&path, Lsn::ZERO).unwrap();
    file.advance(Some(Lsn(0x200)), None, None).unwrap();
    assert!(file.advance(Some(Lsn(0x100)), None, None).is_err());

    let reloaded = LsnFile::open(&path, Lsn::ZERO).unwrap();
    assert_eq!(reloaded.tracking().write_lsn, Lsn(0x200));
}

#[test]
fn separate_handles_merge_their_cursors() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lsn.json");

    // Receive moves write/flush; apply moves replay; neither may clobber
    // the other's progress.
    let mut receive_side = LsnFile::open(&path, Lsn::ZERO).unwrap();
    let mut apply_side = LsnFile::open(&path, Lsn::ZERO).unwrap();
    receive_side
        .advance(Some(Lsn(0x300)), Some(Lsn(0x280)), None)
        .unwrap();
    apply_side.advance(None, None, Some(Lsn(0x200))).unwrap();

    let merged = LsnFile::open(&path, Lsn::ZERO).unwrap();
    assert_eq!(merged.tracking().write_lsn, Lsn(0x300));
    assert_eq!(merged.tracking().flush_lsn, Lsn(0x280));
    assert_eq!(merged.tracking().replay_lsn, Lsn(0x200));
}

#[test]
fn endpos_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lsn.json");
    let mut file = LsnFile::open(&path, Lsn::ZERO).unwrap();
    file.set_endpos(Some(Lsn(0x300))).unwrap();

    let reloaded = LsnFile::open(&path, Lsn::ZERO).unwrap();
    assert_eq!(reloaded.tracking().endpos, Some(Lsn(0x300)));
}
