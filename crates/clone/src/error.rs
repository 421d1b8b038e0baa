// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clone-side error classification.
//!
//! Every error maps to one of the exit codes wrappers observe: source
//! errors to 3, target errors to 4, configuration to 5, everything else
//! to 2.

use pgferry_core::ExitCode;
use pgferry_pgsql::sentinel::SentinelStoreError;
use pgferry_pgsql::snapshot::SnapshotError;
use pgferry_pgsql::PgError;
use pgferry_schema::SchemaError;
use pgferry_store::catalog_store::CatalogError;
use pgferry_store::{RunStoreError, WorkDirError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("source: {0}")]
    Source(#[source] PgError),
    #[error("target: {0}")]
    Target(#[source] PgError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Sentinel(#[from] SentinelStoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    RunStore(#[from] RunStoreError),
    #[error(transparent)]
    WorkDir(#[from] WorkDirError),
    #[error("resuming a consistent run needs the snapshot holder still running; re-run with --not-consistent or keep a `pgferry snapshot` service alive")]
    ResumeNeedsSnapshot,
    #[error("stopped by shutdown request")]
    Stopped,
    #[error("{failed} of {total} units failed")]
    UnitsFailed { failed: usize, total: usize },
    #[error("internal error: {0}")]
    Internal(String),
}

impl CloneError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CloneError::Source(_) => ExitCode::Source,
            CloneError::Target(_) => ExitCode::Target,
            CloneError::Snapshot(_) => ExitCode::Source,
            CloneError::Sentinel(_) => ExitCode::Source,
            CloneError::Schema(_) => ExitCode::Target,
            CloneError::Catalog(CatalogError::FilterChanged { .. }) => ExitCode::Config,
            CloneError::Catalog(_) => ExitCode::Internal,
            CloneError::RunStore(_) => ExitCode::Internal,
            CloneError::WorkDir(_) => ExitCode::Config,
            CloneError::ResumeNeedsSnapshot => ExitCode::Config,
            CloneError::Stopped => ExitCode::Quit,
            CloneError::UnitsFailed { .. } => ExitCode::Internal,
            CloneError::Internal(_) => ExitCode::Internal,
        }
    }
}
