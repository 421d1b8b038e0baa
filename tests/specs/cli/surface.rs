// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box checks of the binary's argument surface and exit codes.

use assert_cmd::Command;

fn pgferry() -> Command {
    Command::cargo_bin("pgferry").expect("binary built")
}

#[test]
fn version_prints_and_succeeds() {
    let assert = pgferry().arg("--version").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(output.contains("pgferry"));
}

#[test]
fn help_lists_the_commands() {
    let assert = pgferry().arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for command in ["clone", "follow", "snapshot", "inspect", "sentinel"] {
        assert!(output.contains(command), "help is missing {command}");
    }
}

#[test]
fn unknown_arguments_exit_with_bad_args() {
    pgferry().arg("--bogus").assert().code(1);
}

#[test]
fn clone_requires_connection_strings() {
    pgferry()
        .arg("clone")
        .env_remove("PGFERRY_SOURCE")
        .env_remove("PGFERRY_TARGET")
        .assert()
        .code(1);
}

#[test]
fn inspect_works_on_an_empty_directory() {
    let tmp = tempfile::tempdir().unwrap();
    pgferry()
        .args(["inspect", "--dir"])
        .arg(tmp.path().join("nothing"))
        .assert()
        .success();
}
