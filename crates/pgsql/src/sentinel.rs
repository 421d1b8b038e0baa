// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The source-resident sentinel record.
//!
//! A single row in pgferry's own schema on the source, visible to every
//! participant: replay cursors plus the apply-enable flag the clone
//! orchestrator flips when the base copy finishes.

use crate::conn::{PgError, Session};
use pgferry_core::sqltext::quote_literal;
use pgferry_core::{Lsn, Sentinel};
use thiserror::Error;
use tracing::info;

/// Schema owned by the tool on the source; messages touching it are
/// filtered out of the change stream.
pub const SENTINEL_SCHEMA: &str = "pgferry";

#[derive(Debug, Error)]
pub enum SentinelStoreError {
    #[error(transparent)]
    Pg(#[from] PgError),
    #[error("sentinel row is missing; run setup first")]
    Missing,
}

/// Accessor for the sentinel row.
pub struct SentinelStore;

impl SentinelStore {
    /// Create the schema, table, and initial row. Idempotent.
    pub async fn init(
        session: &Session,
        startpos: Lsn,
        endpos: Option<Lsn>,
    ) -> Result<(), SentinelStoreError> {
        session
            .client
            .batch_execute(concat!(
                "CREATE SCHEMA IF NOT EXISTS pgferry;\n",
                "CREATE TABLE IF NOT EXISTS pgferry.sentinel (\n",
                "  startpos text, endpos text,\n",
                "  write_lsn text, flush_lsn text, replay_lsn text,\n",
                "  apply bool\n",
                ")",
            ))
            .await
            .map_err(PgError::from)?;

        let existing = session
            .simple_query_opt("SELECT 1 FROM pgferry.sentinel")
            .await?;
        if existing.is_none() {
            let endpos_sql = match endpos {
                Some(lsn) => quote_literal(&lsn.to_string()),
                None => "NULL".to_string(),
            };
            session
                .client
                .simple_query(&format!(
                    "INSERT INTO pgferry.sentinel VALUES ({}, {}, '0/0', '0/0', '0/0', false)",
                    quote_literal(&startpos.to_string()),
                    endpos_sql,
                ))
                .await
                .map_err(PgError::from)?;
            info!(startpos = %startpos, "initialized sentinel");
        }
        Ok(())
    }

    pub async fn get(session: &Session) -> Result<Sentinel, SentinelStoreError> {
        let row = session
            .simple_query_opt(
                "SELECT startpos, endpos, write_lsn, flush_lsn, replay_lsn, apply \
                 FROM pgferry.sentinel",
            )
            .await?
            .ok_or(SentinelStoreError::Missing)?;

        let lsn_at = |idx: usize| -> Result<Lsn, SentinelStoreError> {
            match row.get(idx) {
                Some(text) => text
                    .parse()
                    .map_err(|_| PgError::BadLsn(text.to_string()).into()),
                None => Ok(Lsn::ZERO),
            }
        };
        Ok(Sentinel {
            startpos: lsn_at(0)?,
            endpos: match row.get(1) {
                Some(text) => Some(
                    text.parse()
                        .map_err(|_| PgError::BadLsn(text.to_string()))?,
                ),
                None => None,
            },
            write_lsn: lsn_at(2)?,
            flush_lsn: lsn_at(3)?,
            replay_lsn: lsn_at(4)?,
            apply: row.get(5) == Some("t"),
        })
    }

    /// Flip the apply flag; the clone orchestrator calls this exactly once
    /// when the base copy finishes.
    pub async fn enable_apply(session: &Session) -> Result<(), SentinelStoreError> {
        session
            .client
            .simple_query("UPDATE pgferry.sentinel SET apply = true")
            .await
            .map_err(PgError::from)?;
        info!("sentinel apply flag enabled");
        Ok(())
    }

    pub async fn set_endpos(
        session: &Session,
        endpos: Option<Lsn>,
    ) -> Result<(), SentinelStoreError> {
        let endpos_sql = match endpos {
            Some(lsn) => quote_literal(&lsn.to_string()),
            None => "NULL".to_string(),
        };
        session
            .client
            .simple_query(&format!(
                "UPDATE pgferry.sentinel SET endpos = {endpos_sql}"
            ))
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    /// Report receive/apply progress. Only supplied cursors move.
    pub async fn advance(
        session: &Session,
        write: Option<Lsn>,
        flush: Option<Lsn>,
        replay: Option<Lsn>,
    ) -> Result<(), SentinelStoreError> {
        let mut sets = Vec::new();
        if let Some(lsn) = write {
            sets.push(format!("write_lsn = {}", quote_literal(&lsn.to_string())));
        }
        if let Some(lsn) = flush {
            sets.push(format!("flush_lsn = {}", quote_literal(&lsn.to_string())));
        }
        if let Some(lsn) = replay {
            sets.push(format!("replay_lsn = {}", quote_literal(&lsn.to_string())));
        }
        if sets.is_empty() {
            return Ok(());
        }
        session
            .client
            .simple_query(&format!(
                "UPDATE pgferry.sentinel SET {}",
                sets.join(", ")
            ))
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    /// Remove the sentinel when the slot is dropped.
    pub async fn teardown(session: &Session) -> Result<(), SentinelStoreError> {
        session
            .client
            .batch_execute("DROP SCHEMA IF EXISTS pgferry CASCADE")
            .await
            .map_err(PgError::from)?;
        Ok(())
    }
}
