// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database sessions.
//!
//! A [`Session`] owns one client plus the background task driving its
//! connection. Workers never share sessions; each opens its own and
//! imports the run snapshot before doing any work.

use pgferry_core::{Lsn, TimelineId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tracing::warn;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("query {query:?} returned no rows")]
    EmptyResult { query: String },
    #[error("unexpected result for {query:?}: {detail}")]
    Unexpected { query: String, detail: String },
    #[error("invalid LSN in server reply: {0}")]
    BadLsn(String),
}

/// One client connection plus its driver task.
pub struct Session {
    pub client: Client,
    // NOTE(lifetime): aborted on drop so the driver task never outlives us
    driver: JoinHandle<()>,
}

impl Session {
    /// Connect with a libpq-style connection string.
    pub async fn connect(conninfo: &str) -> Result<Session, PgError> {
        let (client, connection) = tokio_postgres::connect(conninfo, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "connection driver terminated");
            }
        });
        Ok(Session { client, driver })
    }

    /// Run a simple query and return its first row, if any.
    pub async fn simple_query_opt(
        &self,
        query: &str,
    ) -> Result<Option<SimpleQueryRow>, PgError> {
        let messages = self.client.simple_query(query).await?;
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Run a simple query that must return one row.
    pub async fn simple_query_one(&self, query: &str) -> Result<SimpleQueryRow, PgError> {
        self.simple_query_opt(query)
            .await?
            .ok_or_else(|| PgError::EmptyResult {
                query: query.to_string(),
            })
    }

    /// Fetch a single text column from a single-row query.
    pub async fn scalar(&self, query: &str) -> Result<String, PgError> {
        let row = self.simple_query_one(query).await?;
        row.get(0)
            .map(str::to_string)
            .ok_or_else(|| PgError::Unexpected {
                query: query.to_string(),
                detail: "NULL scalar".to_string(),
            })
    }

    /// Fetch a single LSN-valued scalar.
    pub async fn scalar_lsn(&self, query: &str) -> Result<Lsn, PgError> {
        let text = self.scalar(query).await?;
        text.parse().map_err(|_| PgError::BadLsn(text))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Facts about the source the CDC side records under `cdc/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub timeline: TimelineId,
    pub wal_segment_size: u64,
    pub current_wal_lsn: Lsn,
}

impl SourceInfo {
    pub async fn fetch(session: &Session) -> Result<SourceInfo, PgError> {
        let timeline = session
            .scalar("SELECT timeline_id FROM pg_control_checkpoint()")
            .await?;
        let timeline: TimelineId = timeline
            .parse()
            .map_err(|_| PgError::Unexpected {
                query: "pg_control_checkpoint".to_string(),
                detail: format!("timeline_id {timeline:?}"),
            })?;

        let row = session
            .simple_query_one(
                "SELECT setting, unit FROM pg_settings WHERE name = 'wal_segment_size'",
            )
            .await?;
        let setting: u64 = row
            .get(0)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PgError::Unexpected {
                query: "wal_segment_size".to_string(),
                detail: "unparseable setting".to_string(),
            })?;
        let wal_segment_size = match row.get(1) {
            Some("8kB") => setting * 8 * 1024,
            _ => setting,
        };

        let current_wal_lsn = session.scalar_lsn("SELECT pg_current_wal_lsn()").await?;

        Ok(SourceInfo {
            timeline,
            wal_segment_size,
            current_wal_lsn,
        })
    }
}
