// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run options, constructed once by the entry point and passed down
//! explicitly.

use crate::lsn::Lsn;
use serde::{Deserialize, Serialize};

/// Default threshold above which tables are copied in slices.
pub const DEFAULT_SPLIT_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Options for the base clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneOptions {
    /// Parallel table-copy workers.
    pub table_jobs: usize,
    /// Parallel index-build workers.
    pub index_jobs: usize,
    /// Parallel vacuum workers.
    pub vacuum_jobs: usize,
    /// Tables larger than this many bytes are copied in slices.
    pub split_tables_larger_than: u64,
    /// Issue a covering `DROP TABLE IF EXISTS ... CASCADE` before restore.
    pub drop_if_exists: bool,
    /// Escalate any single failure into whole-run shutdown.
    pub fail_fast: bool,
    /// Skip the vacuum phase entirely.
    pub skip_vacuum: bool,
    /// Skip extension comments in the restore list.
    pub skip_extension_comments: bool,
    /// Copy roles before the schema phase.
    pub with_roles: bool,
    /// Resume an interrupted run; done markers short-circuit work.
    pub resume: bool,
    /// Discard the previous run state and start over.
    pub restart: bool,
    /// Take independent per-worker snapshots instead of importing one
    /// consistent snapshot everywhere.
    pub not_consistent: bool,
    /// Also set up CDC and replay changes after the clone.
    pub follow: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        CloneOptions {
            table_jobs: 4,
            index_jobs: 4,
            vacuum_jobs: 1,
            split_tables_larger_than: DEFAULT_SPLIT_THRESHOLD,
            drop_if_exists: false,
            fail_fast: false,
            skip_vacuum: false,
            skip_extension_comments: false,
            with_roles: false,
            resume: false,
            restart: false,
            not_consistent: false,
            follow: false,
        }
    }
}

/// Which CDC stages run, and how they are wired together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdcMode {
    /// Receive only: write JSON segment files.
    Receive,
    /// Receive + transform: also produce SQL files.
    Prefetch,
    /// Receive + transform + apply over segment files.
    Catchup,
    /// All three stages wired with in-memory channels.
    Replay,
}

/// Options for the follow / CDC side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowOptions {
    pub mode: CdcMode,
    /// Replication slot name on the source.
    pub slot_name: String,
    /// Replication origin name on the target.
    pub origin_name: String,
    /// Output plugin: `test_decoding` or `wal2json`.
    pub plugin: String,
    /// Stop cleanly once replay reaches this position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpos: Option<Lsn>,
}

impl Default for FollowOptions {
    fn default() -> Self {
        FollowOptions {
            mode: CdcMode::Catchup,
            slot_name: "pgferry".to_string(),
            origin_name: "pgferry".to_string(),
            plugin: "test_decoding".to_string(),
            endpos: None,
        }
    }
}
