// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication origin tracking on the target.
//!
//! The origin is advanced in the same target transaction as the applied
//! DML, which is what makes replay exactly-once across crashes. These
//! helpers only build and run the SQL; the apply loop owns transaction
//! boundaries.

use crate::conn::PgError;
use crate::executor::{ExecError, SqlExecutor};
use pgferry_core::sqltext::quote_literal;
use pgferry_core::Lsn;
use tracing::info;

/// SQL attaching the session to its origin.
pub fn session_setup_sql(origin: &str) -> String {
    format!(
        "SELECT pg_replication_origin_session_setup({})",
        quote_literal(origin)
    )
}

/// SQL recording the source commit position inside the open transaction.
pub fn xact_setup_sql(commit_lsn: Lsn, timestamp: &str) -> String {
    format!(
        "SELECT pg_replication_origin_xact_setup({}, {})",
        quote_literal(&commit_lsn.to_string()),
        quote_literal(timestamp),
    )
}

/// Target-side origin bookkeeping.
pub struct OriginTracker {
    pub name: String,
}

impl OriginTracker {
    pub fn new(name: impl Into<String>) -> Self {
        OriginTracker { name: name.into() }
    }

    /// Create the origin if missing; returns true when newly created.
    pub async fn ensure<E: SqlExecutor>(&self, executor: &mut E) -> Result<bool, ExecError> {
        let exists = executor
            .scalar(&format!(
                "SELECT 1 FROM pg_replication_origin WHERE roname = {}",
                quote_literal(&self.name)
            ))
            .await?
            .is_some();
        if exists {
            return Ok(false);
        }
        executor
            .batch(&format!(
                "SELECT pg_replication_origin_create({})",
                quote_literal(&self.name)
            ))
            .await?;
        info!(origin = %self.name, "created replication origin");
        Ok(true)
    }

    /// Move the origin to `lsn` without applying anything (initial
    /// positioning at `startpos`).
    pub async fn advance<E: SqlExecutor>(
        &self,
        executor: &mut E,
        lsn: Lsn,
    ) -> Result<(), ExecError> {
        executor
            .batch(&format!(
                "SELECT pg_replication_origin_advance({}, {})",
                quote_literal(&self.name),
                quote_literal(&lsn.to_string()),
            ))
            .await?;
        Ok(())
    }

    /// Attach the current session; must run before any tracked transaction.
    pub async fn session_setup<E: SqlExecutor>(&self, executor: &mut E) -> Result<(), ExecError> {
        executor.batch(&session_setup_sql(&self.name)).await
    }

    /// Where replay stands according to the target.
    pub async fn progress<E: SqlExecutor>(
        &self,
        executor: &mut E,
    ) -> Result<Option<Lsn>, ExecError> {
        let text = executor
            .scalar(&format!(
                "SELECT pg_replication_origin_progress({}, false)",
                quote_literal(&self.name)
            ))
            .await?;
        match text {
            Some(text) => {
                let lsn = text.parse().map_err(|_| ExecError::Pg(PgError::BadLsn(text)))?;
                Ok(Some(lsn))
            }
            None => Ok(None),
        }
    }

    pub async fn drop<E: SqlExecutor>(&self, executor: &mut E) -> Result<(), ExecError> {
        executor
            .batch(&format!(
                "SELECT pg_replication_origin_drop({})",
                quote_literal(&self.name)
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "origin_tests.rs"]
mod tests;
