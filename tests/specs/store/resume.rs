// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resume semantics: a run killed at any point and restarted without
//! `--restart` converges on the same set of done markers as an
//! uninterrupted run.

use pgferry_core::Oid;
use pgferry_store::{Claim, FsRunStore, RunStore, WorkDir, WorkUnit};

fn units() -> Vec<WorkUnit> {
    vec![
        WorkUnit::section("pre-data-dump"),
        WorkUnit::section("pre-data-restore"),
        WorkUnit::table_part(Oid(16387), 1, 1, "public.t"),
        WorkUnit::index(Oid(16400), "public.t_pkey"),
        WorkUnit::constraint(Oid(16401), "t_pkey"),
        WorkUnit::vacuum(Oid(16387), "public.t"),
    ]
}

/// Run the "work" for every unit, skipping whatever is already done.
fn run_all(store: &FsRunStore, performed: &mut Vec<String>) {
    for unit in units() {
        match store.claim(&unit).unwrap() {
            Claim::AlreadyDone | Claim::Busy { .. } => continue,
            Claim::Acquired => {
                performed.push(unit.key.clone());
                store.mark_done(&unit).unwrap();
            }
        }
    }
}

#[test]
fn interrupted_run_resumes_to_the_same_state() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("work");
    let workdir = WorkDir::init(Some(dir.clone()), false, false).unwrap();
    std::fs::write(workdir.paths.schema_json(), "{}").unwrap();

    // First run dies after the restore section: only two units landed.
    {
        let store = FsRunStore::new(workdir.paths.run_dir());
        let mut performed = Vec::new();
        for unit in units().into_iter().take(2) {
            assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
            performed.push(unit.key.clone());
            store.mark_done(&unit).unwrap();
        }
    }
    drop(workdir);

    // Restart without --restart: the finished sections are skipped, the
    // rest runs exactly once.
    let workdir = WorkDir::init(Some(dir), false, true).unwrap();
    let store = FsRunStore::new(workdir.paths.run_dir());
    let mut performed = Vec::new();
    run_all(&store, &mut performed);
    assert_eq!(
        performed,
        vec![
            "table.16387".to_string(),
            "index.16400".to_string(),
            "constraint.16401".to_string(),
            "vacuum.16387".to_string(),
        ]
    );

    // A third run finds nothing left to do.
    let mut performed = Vec::new();
    run_all(&store, &mut performed);
    assert!(performed.is_empty());
}

#[test]
fn crash_mid_unit_leaves_a_reclaimable_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let unit = WorkUnit::index(Oid(16400), "public.t_pkey");

    // The dying worker claimed the unit but never finished.
    {
        let store = FsRunStore::new(tmp.path());
        assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    }

    // The restarted process (same PID here, so simulate a dead holder)
    // breaks the stale lock and redoes the unit.
    let store = FsRunStore::new(tmp.path()).with_liveness_probe(|_| false);
    assert_eq!(store.claim(&unit).unwrap(), Claim::Acquired);
    store.mark_done(&unit).unwrap();
    assert!(store.is_done(&unit));
}
