// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transaction snapshot lifecycle.
//!
//! One owner session exports a snapshot and keeps its surrounding
//! transaction open until every consumer has imported it; the change slot,
//! when requested, is created inside the same transaction so the clone and
//! the change stream share one consistent point.

use crate::conn::{PgError, Session};
use pgferry_core::sqltext::quote_literal;
use pgferry_core::Lsn;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Pg(#[from] PgError),
    #[error("snapshot is not prepared")]
    NotPrepared,
    #[error("snapshot already closed; consumers can no longer import it")]
    Closed,
    #[error("closeSnapshot called twice")]
    DoubleClose,
}

/// Lifecycle state of the run snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Unknown,
    /// Consistency was opted out; workers run independent transactions.
    Skipped,
    NotConsistent,
    Exported,
    Set,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Sql,
    Logical,
}

/// Open a repeatable-read transaction on a worker session, importing the
/// given snapshot when one is supplied. Workers in not-consistent mode
/// pass `None` and get an independent transaction.
pub async fn import_snapshot(
    session: &Session,
    identifier: Option<&str>,
) -> Result<(), SnapshotError> {
    session
        .client
        .simple_query("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .await
        .map_err(PgError::from)?;
    if let Some(identifier) = identifier {
        session
            .client
            .simple_query(&format!(
                "SET TRANSACTION SNAPSHOT {}",
                quote_literal(identifier)
            ))
            .await
            .map_err(PgError::from)?;
    }
    Ok(())
}

/// Owns the exported snapshot and the session holding it open.
pub struct SnapshotManager {
    owner: Option<Session>,
    identifier: Option<String>,
    state: SnapshotState,
    kind: SnapshotKind,
    /// Creation LSN of the slot created alongside a logical snapshot.
    slot_lsn: Option<Lsn>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        SnapshotManager {
            owner: None,
            identifier: None,
            state: SnapshotState::Unknown,
            kind: SnapshotKind::Sql,
            slot_lsn: None,
        }
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn slot_lsn(&self) -> Option<Lsn> {
        self.slot_lsn
    }

    /// Adopt a caller-supplied snapshot identifier (exported by an
    /// auxiliary holder process); no owner transaction is opened here.
    pub fn adopt(&mut self, identifier: String) {
        info!(snapshot = %identifier, "adopting externally held snapshot");
        self.identifier = Some(identifier);
        self.state = SnapshotState::Exported;
        self.kind = SnapshotKind::Sql;
    }

    /// Opt out of consistency: workers take independent transactions.
    pub fn skip(&mut self) {
        self.state = SnapshotState::Skipped;
    }

    /// Export a new SQL snapshot on `owner` and hold it open.
    pub async fn export(&mut self, owner: Session) -> Result<&str, SnapshotError> {
        owner
            .client
            .simple_query("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await
            .map_err(PgError::from)?;
        let identifier = owner.scalar("SELECT pg_export_snapshot()").await?;
        info!(snapshot = %identifier, "exported snapshot");

        self.owner = Some(owner);
        self.identifier = Some(identifier);
        self.state = SnapshotState::Exported;
        self.kind = SnapshotKind::Sql;
        self.identifier
            .as_deref()
            .ok_or(SnapshotError::NotPrepared)
    }

    /// Export a snapshot from the transaction that also creates the
    /// logical slot, so both share one consistent point. Returns the
    /// slot's creation LSN.
    pub async fn export_with_slot(
        &mut self,
        owner: Session,
        slot_name: &str,
        plugin: &str,
    ) -> Result<Lsn, SnapshotError> {
        owner
            .client
            .simple_query("BEGIN ISOLATION LEVEL REPEATABLE READ")
            .await
            .map_err(PgError::from)?;
        // The transaction snapshot is taken at this first statement, which
        // is also where the slot's consistent point is chosen.
        let query = format!(
            "SELECT lsn FROM pg_create_logical_replication_slot({}, {})",
            quote_literal(slot_name),
            quote_literal(plugin),
        );
        let slot_lsn = owner.scalar_lsn(&query).await?;
        let identifier = owner.scalar("SELECT pg_export_snapshot()").await?;
        info!(snapshot = %identifier, slot = slot_name, lsn = %slot_lsn, "exported snapshot with slot");

        self.owner = Some(owner);
        self.identifier = Some(identifier);
        self.state = SnapshotState::Exported;
        self.kind = SnapshotKind::Logical;
        self.slot_lsn = Some(slot_lsn);
        Ok(slot_lsn)
    }

    /// Open a repeatable-read transaction on a worker session and import
    /// the run snapshot into it. The worker must not commit until its unit
    /// completes. With a skipped snapshot this degrades to a plain
    /// transaction.
    pub async fn import_into(&self, session: &Session) -> Result<(), SnapshotError> {
        match self.state {
            SnapshotState::Closed => Err(SnapshotError::Closed),
            SnapshotState::Skipped => import_snapshot(session, None).await,
            _ => {
                let identifier =
                    self.identifier.as_deref().ok_or(SnapshotError::NotPrepared)?;
                import_snapshot(session, Some(identifier)).await
            }
        }
    }

    /// Commit the owner transaction. Called exactly once, after every
    /// consumer has imported; importing afterwards is an error.
    pub async fn close(&mut self) -> Result<(), SnapshotError> {
        if self.state == SnapshotState::Closed {
            return Err(SnapshotError::DoubleClose);
        }
        if let Some(owner) = self.owner.take() {
            owner
                .client
                .simple_query("COMMIT")
                .await
                .map_err(PgError::from)?;
        }
        self.state = SnapshotState::Closed;
        info!("closed snapshot");
        Ok(())
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        SnapshotManager::new()
    }
}
