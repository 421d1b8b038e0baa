// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQL execution capability.
//!
//! The index/vacuum workers and the CDC apply stage run plain SQL text on
//! the target. They depend on this trait rather than a concrete client so
//! their logic runs in tests against a recording fake. The executor
//! classifies duplicate-object errors, which callers treat as
//! already-done.

use crate::conn::{PgError, Session};
use async_trait::async_trait;
use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The object the statement would create already exists on the target.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Pg(#[from] PgError),
}

impl ExecError {
    fn classify(error: tokio_postgres::Error) -> ExecError {
        let duplicate = matches!(
            error.code(),
            Some(&SqlState::DUPLICATE_TABLE)
                | Some(&SqlState::DUPLICATE_OBJECT)
                | Some(&SqlState::DUPLICATE_SCHEMA)
        );
        if duplicate {
            ExecError::AlreadyExists(error.to_string())
        } else {
            ExecError::Pg(PgError::Postgres(error))
        }
    }
}

/// Executes SQL text on the target.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Run one or more semicolon-separated statements.
    async fn batch(&mut self, sql: &str) -> Result<(), ExecError>;

    /// Fetch a single optional text scalar.
    async fn scalar(&mut self, sql: &str) -> Result<Option<String>, ExecError>;
}

/// Production executor over a live session.
pub struct PgExecutor {
    session: Session,
}

impl PgExecutor {
    pub fn new(session: Session) -> Self {
        PgExecutor { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn batch(&mut self, sql: &str) -> Result<(), ExecError> {
        self.session
            .client
            .batch_execute(sql)
            .await
            .map_err(ExecError::classify)
    }

    async fn scalar(&mut self, sql: &str) -> Result<Option<String>, ExecError> {
        let row = self
            .session
            .simple_query_opt(sql)
            .await
            .map_err(ExecError::from)?;
        Ok(row.and_then(|r| r.get(0).map(str::to_string)))
    }
}
