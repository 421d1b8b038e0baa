// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn fresh(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("work")
}

#[test]
fn init_creates_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::init(Some(fresh(&tmp)), false, false).unwrap();
    assert!(workdir.paths.schema_dir().is_dir());
    assert!(workdir.paths.run_dir().is_dir());
    assert!(workdir.paths.cdc_dir().is_dir());
}

#[test]
fn restart_and_resume_are_exclusive() {
    let tmp = tempfile::tempdir().unwrap();
    let err = WorkDir::init(Some(fresh(&tmp)), true, true).unwrap_err();
    assert!(matches!(err, WorkDirError::RestartAndResume));
}

#[test]
fn second_run_without_flags_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fresh(&tmp);
    {
        let workdir = WorkDir::init(Some(root.clone()), false, false).unwrap();
        std::fs::write(workdir.paths.schema_json(), "{}").unwrap();
    }
    let err = WorkDir::init(Some(root), false, false).unwrap_err();
    assert!(matches!(err, WorkDirError::PreviousRunFound(_)));
}

#[test]
fn restart_wipes_previous_state() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fresh(&tmp);
    {
        let workdir = WorkDir::init(Some(root.clone()), false, false).unwrap();
        std::fs::write(workdir.paths.schema_json(), "{}").unwrap();
        std::fs::write(workdir.paths.run_dir().join("1.done"), "").unwrap();
    }
    let workdir = WorkDir::init(Some(root), true, false).unwrap();
    assert!(!workdir.paths.schema_json().exists());
    assert_eq!(workdir.inspect().unwrap().done_markers, 0);
}

#[test]
fn resume_requires_usable_state() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fresh(&tmp);
    let err = WorkDir::init(Some(root.clone()), false, true).unwrap_err();
    assert!(matches!(err, WorkDirError::NothingToResume(_)));

    {
        let workdir = WorkDir::init(Some(root.clone()), false, false).unwrap();
        std::fs::write(workdir.paths.schema_json(), "{}").unwrap();
        std::fs::write(workdir.paths.run_dir().join("16385.done"), "").unwrap();
    }
    let workdir = WorkDir::init(Some(root), false, true).unwrap();
    // Resume never removes done markers.
    assert_eq!(workdir.inspect().unwrap().done_markers, 1);
}

#[test]
fn pid_file_blocks_second_holder() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fresh(&tmp);
    let mut first = WorkDir::init(Some(root.clone()), false, false).unwrap();
    first.acquire_pid_file().unwrap();

    let mut second = WorkDir::init(Some(root.clone()), false, false).unwrap();
    let err = second.acquire_pid_file().unwrap_err();
    assert!(matches!(err, WorkDirError::PidFileHeld(_)));

    // An auxiliary service PID file coexists with the main one.
    second.acquire_service_pid_file("snapshot").unwrap();

    drop(first);
    assert!(!Paths::new(&root).pid_file().exists());
}

#[test]
fn inspect_reports_recorded_pid() {
    let tmp = tempfile::tempdir().unwrap();
    let root = fresh(&tmp);
    let mut workdir = WorkDir::init(Some(root), false, false).unwrap();
    workdir.acquire_pid_file().unwrap();
    let state = workdir.inspect().unwrap();
    assert_eq!(state.recorded_pid, Some(std::process::id()));
}

#[test]
fn current_pid_is_alive() {
    assert!(pid_is_alive(std::process::id()));
}
