// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication slot management on the source.

use crate::conn::{PgError, Session};
use pgferry_core::sqltext::quote_literal;
use pgferry_core::Lsn;
use tracing::info;

/// A named logical slot on the source.
pub struct SlotHandle {
    pub name: String,
}

impl SlotHandle {
    pub fn new(name: impl Into<String>) -> Self {
        SlotHandle { name: name.into() }
    }

    pub async fn exists(&self, session: &Session) -> Result<bool, PgError> {
        let query = format!(
            "SELECT 1 FROM pg_replication_slots WHERE slot_name = {}",
            quote_literal(&self.name)
        );
        Ok(session.simple_query_opt(&query).await?.is_some())
    }

    /// Create the slot and return its consistent point.
    pub async fn create(&self, session: &Session, plugin: &str) -> Result<Lsn, PgError> {
        let query = format!(
            "SELECT lsn FROM pg_create_logical_replication_slot({}, {})",
            quote_literal(&self.name),
            quote_literal(plugin),
        );
        let lsn = session.scalar_lsn(&query).await?;
        info!(slot = %self.name, plugin, lsn = %lsn, "created replication slot");
        Ok(lsn)
    }

    /// The slot's confirmed flush position (how far the source may recycle
    /// WAL).
    pub async fn confirmed_flush_lsn(&self, session: &Session) -> Result<Lsn, PgError> {
        let query = format!(
            "SELECT confirmed_flush_lsn FROM pg_replication_slots WHERE slot_name = {}",
            quote_literal(&self.name)
        );
        session.scalar_lsn(&query).await
    }

    pub async fn drop(&self, session: &Session) -> Result<(), PgError> {
        let query = format!(
            "SELECT pg_drop_replication_slot({})",
            quote_literal(&self.name)
        );
        session.client.simple_query(&query).await?;
        info!(slot = %self.name, "dropped replication slot");
        Ok(())
    }
}
