// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The change-stream source capability.
//!
//! The receive stage consumes batches of raw plugin output through
//! [`ChangeSource`]. The production implementation drives the slot's SQL
//! interface on a dedicated source session: each consumed batch commits,
//! which also advances the slot's confirmed flush position so the source
//! can release WAL. An in-memory implementation backs the receive tests.

use crate::conn::{PgError, Session};
use crate::slot::SlotHandle;
use async_trait::async_trait;
use pgferry_core::sqltext::quote_literal;
use pgferry_core::Lsn;
use tokio_postgres::SimpleQueryMessage;

/// One raw change as produced by the output plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub lsn: Lsn,
    pub xid: Option<u32>,
    /// The plugin's textual payload, unparsed.
    pub data: String,
}

/// Where the receive stage gets its changes.
#[async_trait]
pub trait ChangeSource: Send {
    /// Consume up to `max` pending changes; an empty batch means the
    /// stream is idle.
    async fn fetch(&mut self, max: u32) -> Result<Vec<RawChange>, PgError>;

    /// The position up to which the source considers this consumer caught
    /// up (WAL before it may be recycled).
    async fn confirmed_flush_lsn(&mut self) -> Result<Lsn, PgError>;

    /// Re-establish the underlying connection after a transient error.
    async fn reconnect(&mut self) -> Result<(), PgError> {
        Ok(())
    }
}

/// Build the slot-consumption query.
pub fn changes_query(slot: &str, max: u32, options: &[(&str, &str)]) -> String {
    let mut args = vec![
        quote_literal(slot),
        "NULL".to_string(),
        max.to_string(),
    ];
    for (name, value) in options {
        args.push(quote_literal(name));
        args.push(quote_literal(value));
    }
    format!(
        "SELECT lsn, xid, data FROM pg_logical_slot_get_changes({})",
        args.join(", ")
    )
}

/// Production change source over the slot's SQL interface.
pub struct SlotChangeSource {
    session: Session,
    conninfo: String,
    slot: SlotHandle,
    options: Vec<(String, String)>,
}

impl SlotChangeSource {
    pub fn new(
        session: Session,
        conninfo: impl Into<String>,
        slot_name: impl Into<String>,
        options: Vec<(String, String)>,
    ) -> Self {
        SlotChangeSource {
            session,
            conninfo: conninfo.into(),
            slot: SlotHandle::new(slot_name),
            options,
        }
    }
}

#[async_trait]
impl ChangeSource for SlotChangeSource {
    async fn fetch(&mut self, max: u32) -> Result<Vec<RawChange>, PgError> {
        let options: Vec<(&str, &str)> = self
            .options
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let query = changes_query(&self.slot.name, max, &options);
        let messages = self.session.client.simple_query(&query).await?;

        let mut changes = Vec::new();
        for message in messages {
            let SimpleQueryMessage::Row(row) = message else {
                continue;
            };
            let lsn_text = row.get(0).unwrap_or_default();
            let lsn: Lsn = lsn_text
                .parse()
                .map_err(|_| PgError::BadLsn(lsn_text.to_string()))?;
            let xid = row.get(1).and_then(|s| s.parse().ok());
            let data = row.get(2).unwrap_or_default().to_string();
            changes.push(RawChange { lsn, xid, data });
        }
        Ok(changes)
    }

    async fn confirmed_flush_lsn(&mut self) -> Result<Lsn, PgError> {
        self.slot.confirmed_flush_lsn(&self.session).await
    }

    async fn reconnect(&mut self) -> Result<(), PgError> {
        self.session = Session::connect(&self.conninfo).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
