// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn advance_accepts_monotonic_updates() {
    let mut sentinel = Sentinel::new(Lsn(100));
    sentinel
        .advance(Some(Lsn(200)), Some(Lsn(150)), None)
        .unwrap();
    assert_eq!(sentinel.write_lsn, Lsn(200));
    assert_eq!(sentinel.flush_lsn, Lsn(150));
    assert_eq!(sentinel.replay_lsn, Lsn::ZERO);

    // Repeating the same position is fine.
    sentinel
        .advance(Some(Lsn(200)), Some(Lsn(200)), Some(Lsn(180)))
        .unwrap();
}

#[test]
fn advance_rejects_regression() {
    let mut sentinel = Sentinel::new(Lsn(100));
    sentinel
        .advance(Some(Lsn(200)), Some(Lsn(200)), Some(Lsn(200)))
        .unwrap();
    let err = sentinel.advance(None, None, Some(Lsn(50))).unwrap_err();
    assert_eq!(
        err,
        SentinelError::NotMonotonic {
            field: "replay_lsn",
            from: Lsn(200),
            to: Lsn(50),
        }
    );
    // The failed update must not have been applied partially.
    assert_eq!(sentinel.replay_lsn, Lsn(200));
}

#[test]
fn apply_flag_never_resets() {
    let mut sentinel = Sentinel::new(Lsn(0));
    sentinel.set_apply(false).unwrap();
    sentinel.enable_apply().unwrap();
    assert!(sentinel.apply);
    assert_eq!(sentinel.set_apply(false), Err(SentinelError::ApplyFlagReset));
    // Setting true again is idempotent.
    sentinel.enable_apply().unwrap();
}

#[test]
fn endpos_is_inclusive() {
    let mut sentinel = Sentinel::new(Lsn(0));
    sentinel.endpos = Some(Lsn(300));
    assert!(!sentinel.reached_endpos());
    sentinel
        .advance(Some(Lsn(300)), Some(Lsn(300)), Some(Lsn(300)))
        .unwrap();
    assert!(sentinel.reached_endpos());
}

#[test]
fn unset_endpos_never_stops() {
    let mut sentinel = Sentinel::new(Lsn(0));
    sentinel
        .advance(Some(Lsn(500)), Some(Lsn(500)), Some(Lsn(500)))
        .unwrap();
    assert!(!sentinel.reached_endpos());
}
