// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pgferry_core::Oid;

fn unit() -> WorkUnit {
    WorkUnit::index(Oid(16400), "public.t_pkey")
}

#[test]
fn unit_keys_are_namespaced_by_kind() {
    assert_eq!(WorkUnit::table_part(Oid(5), 1, 1, "t").key, "table.5");
    assert_eq!(WorkUnit::table_part(Oid(5), 2, 4, "t").key, "table.5.2");
    assert_eq!(WorkUnit::index(Oid(5), "i").key, "index.5");
    assert_eq!(WorkUnit::vacuum(Oid(5), "t").key, "vacuum.5");
    assert_eq!(WorkUnit::section("pre-data").key, "section.pre-data");
}

#[test]
fn fs_claim_then_done_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsRunStore::new(tmp.path());
    let unit = unit();

    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    let summary = store.read_lock(&unit).unwrap().unwrap();
    assert_eq!(summary.pid, std::process::id());
    assert_eq!(summary.key, "index.16400");

    store.mark_done(&unit).unwrap();
    assert!(store.is_done(&unit));
    assert!(store.read_lock(&unit).unwrap().is_none());
    assert_eq!(store.claim(&unit).unwrap(), Claim::AlreadyDone);
}

#[test]
fn fs_live_lock_is_busy() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsRunStore::new(tmp.path());
    let unit = unit();
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    // A second claim (same process is alive) must not steal the unit.
    assert_eq!(
        store.claim(&unit).unwrap(),
        Claim::Busy {
            holder: std::process::id()
        }
    );
}

#[test]
fn fs_stale_lock_is_broken() {
    let tmp = tempfile::tempdir().unwrap();
    // Probe that declares every holder dead.
    let store = FsRunStore::new(tmp.path()).with_liveness_probe(|_| false);
    let unit = unit();
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    // First claimer "died"; the unit can be re-claimed.
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
}

#[test]
fn fs_release_without_done_allows_reclaim() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsRunStore::new(tmp.path());
    let unit = unit();
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    store.release(&unit).unwrap();
    assert!(!store.is_done(&unit));
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
}

#[test]
fn done_marker_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let unit = unit();
    {
        let store = FsRunStore::new(tmp.path());
        store.claim(&unit).unwrap();
        store.mark_done(&unit).unwrap();
    }
    let store = FsRunStore::new(tmp.path());
    assert_eq!(store.claim(&unit).unwrap(), Claim::AlreadyDone);
}

#[test]
fn mem_store_mirrors_fs_semantics() {
    let store = MemRunStore::new();
    let unit = unit();

    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    assert_eq!(
        store.claim(&unit).unwrap(),
        Claim::Busy {
            holder: std::process::id()
        }
    );

    store.mark_done(&unit).unwrap();
    assert_eq!(store.claim(&unit).unwrap(), Claim::AlreadyDone);
    assert_eq!(store.done_keys(), vec!["index.16400".to_string()]);
}

#[test]
fn mem_store_breaks_stale_locks() {
    let store = MemRunStore::new();
    let unit = unit();
    store.plant_lock(&unit, 99999);
    assert_eq!(store.claim(&unit).unwrap(), Claim::Busy { holder: 99999 });

    store.declare_dead(99999);
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
}
