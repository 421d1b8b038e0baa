// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line surface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "pgferry",
    version,
    about = "Clone a PostgreSQL database and stream changes until the target converges"
)]
pub struct Cli {
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct ConnArgs {
    /// Source connection string.
    #[arg(long, env = "PGFERRY_SOURCE")]
    pub source: String,

    /// Target connection string.
    #[arg(long, env = "PGFERRY_TARGET")]
    pub target: String,

    /// Work directory (defaults to the system temp dir + "pgferry").
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CloneArgs {
    #[command(flatten)]
    pub conn: ConnArgs,

    /// Parallel table-copy workers.
    #[arg(long, default_value_t = 4)]
    pub table_jobs: usize,

    /// Parallel index-build workers.
    #[arg(long, default_value_t = 4)]
    pub index_jobs: usize,

    /// Parallel vacuum workers.
    #[arg(long, default_value_t = 1)]
    pub vacuum_jobs: usize,

    /// Copy tables larger than this many bytes in slices.
    #[arg(long, default_value_t = pgferry_core::options::DEFAULT_SPLIT_THRESHOLD)]
    pub split_tables_larger_than: u64,

    /// Issue DROP TABLE IF EXISTS ... CASCADE before restoring.
    #[arg(long)]
    pub drop_if_exists: bool,

    /// Abort the whole run on the first failure.
    #[arg(long)]
    pub fail_fast: bool,

    /// Skip the vacuum phase.
    #[arg(long)]
    pub skip_vacuum: bool,

    /// Copy roles before the schema.
    #[arg(long)]
    pub roles: bool,

    /// Resume an interrupted run.
    #[arg(long)]
    pub resume: bool,

    /// Discard previous run state and start over.
    #[arg(long)]
    pub restart: bool,

    /// Let each worker take its own snapshot (no cross-worker
    /// consistency).
    #[arg(long)]
    pub not_consistent: bool,

    /// Also set up change streaming and replay changes after the clone.
    #[arg(long)]
    pub follow: bool,

    /// JSON file with filter rules (exclude_schemas, exclude_tables,
    /// exclude_indexes, include_only_tables).
    #[arg(long)]
    pub filters: Option<PathBuf>,

    #[command(flatten)]
    pub cdc: CdcArgs,
}

#[derive(Debug, Clone, Args)]
pub struct CdcArgs {
    /// Replication slot name on the source.
    #[arg(long, default_value = "pgferry")]
    pub slot_name: String,

    /// Replication origin name on the target.
    #[arg(long, default_value = "pgferry")]
    pub origin: String,

    /// Logical decoding output plugin.
    #[arg(long, default_value = "test_decoding")]
    pub plugin: String,

    /// Stop replay cleanly at this LSN (inclusive).
    #[arg(long)]
    pub endpos: Option<String>,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum FollowMode {
    Receive,
    Prefetch,
    Catchup,
    Replay,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the base clone (optionally followed by change replay).
    Clone(CloneArgs),

    /// Run the change-stream pipeline against an existing slot.
    Follow {
        #[command(flatten)]
        conn: ConnArgs,
        #[command(flatten)]
        cdc: CdcArgs,
        /// Which stages to run.
        #[arg(long, value_enum, default_value_t = FollowMode::Catchup)]
        mode: FollowMode,
        /// Resume against the existing work directory.
        #[arg(long)]
        resume: bool,
    },

    /// Export a snapshot and hold it open until terminated.
    Snapshot {
        #[command(flatten)]
        conn: ConnArgs,
    },

    /// Build the retained indexes and constraints on the target
    /// (standalone; always uses IF NOT EXISTS).
    CopyIndexes {
        #[command(flatten)]
        conn: ConnArgs,
        /// Parallel index-build workers.
        #[arg(long, default_value_t = 4)]
        index_jobs: usize,
    },

    /// Inspect the work directory state.
    Inspect {
        /// Work directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Read or update the sentinel on the source.
    Sentinel {
        #[command(flatten)]
        conn: ConnArgs,
        #[command(subcommand)]
        action: SentinelAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum SentinelAction {
    /// Print the sentinel record.
    Get,
    /// Set the replay stop position.
    SetEndpos { endpos: String },
    /// Allow the apply stage to start.
    EnableApply,
}
