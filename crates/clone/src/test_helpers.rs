// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for pool tests: a recording fake executor and catalog
//! builders.

use async_trait::async_trait;
use parking_lot::Mutex;
use pgferry_core::{
    IndexConstraint, Oid, SourceAttr, SourceIndex, SourceTable, TablePart,
};
use pgferry_pgsql::{ExecError, PgError, SqlExecutor};
use std::collections::HashMap;
use std::sync::Arc;

/// Records every statement; behavior is scripted by substring match.
#[derive(Clone, Default)]
pub struct FakeExecutor {
    pub log: Arc<Mutex<Vec<String>>>,
    /// Statements containing any of these substrings report
    /// `AlreadyExists`.
    pub already_exists: Vec<String>,
    /// Statements containing any of these substrings fail hard.
    pub fail_on: Vec<String>,
    /// Scalar results keyed by a substring of the query.
    pub scalars: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeExecutor {
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|s| s.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SqlExecutor for FakeExecutor {
    async fn batch(&mut self, sql: &str) -> Result<(), ExecError> {
        self.log.lock().push(sql.to_string());
        if self.fail_on.iter().any(|needle| sql.contains(needle)) {
            return Err(ExecError::Pg(PgError::Unexpected {
                query: sql.to_string(),
                detail: "scripted failure".to_string(),
            }));
        }
        if self.already_exists.iter().any(|needle| sql.contains(needle)) {
            return Err(ExecError::AlreadyExists("scripted".to_string()));
        }
        Ok(())
    }

    async fn scalar(&mut self, sql: &str) -> Result<Option<String>, ExecError> {
        self.log.lock().push(sql.to_string());
        let scalars = self.scalars.lock();
        Ok(scalars
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, value)| value.clone()))
    }
}

pub fn table(oid: u32, nsp: &str, rel: &str, bytes: u64) -> SourceTable {
    SourceTable {
        oid: Oid(oid),
        nspname: nsp.to_string(),
        relname: rel.to_string(),
        reltuples: 100,
        bytes,
        relpages: 10,
        amname: "heap".to_string(),
        attrs: vec![SourceAttr {
            attnum: 1,
            name: "id".to_string(),
            type_oid: 23,
            is_pkey: true,
        }],
        parts: vec![TablePart::whole()],
    }
}

pub fn plain_index(oid: u32, table_oid: u32, name: &str) -> SourceIndex {
    SourceIndex {
        oid: Oid(oid),
        table_oid: Oid(table_oid),
        nspname: "public".to_string(),
        relname: name.to_string(),
        definition: format!("CREATE INDEX {name} ON public.t USING btree (v)"),
        is_unique: false,
        constraint: None,
    }
}

pub fn pkey_index(oid: u32, table_oid: u32, name: &str) -> SourceIndex {
    SourceIndex {
        oid: Oid(oid),
        table_oid: Oid(table_oid),
        nspname: "public".to_string(),
        relname: name.to_string(),
        definition: format!("CREATE UNIQUE INDEX {name} ON public.t USING btree (id)"),
        is_unique: true,
        constraint: Some(IndexConstraint {
            oid: Oid(oid + 1000),
            name: name.to_string(),
            definition: "PRIMARY KEY (id)".to_string(),
            is_primary: true,
            is_unique: true,
        }),
    }
}

pub fn excl_index(oid: u32, table_oid: u32, name: &str) -> SourceIndex {
    SourceIndex {
        oid: Oid(oid),
        table_oid: Oid(table_oid),
        nspname: "public".to_string(),
        relname: name.to_string(),
        definition: format!("CREATE INDEX {name} ON public.t USING gist (room)"),
        is_unique: false,
        constraint: Some(IndexConstraint {
            oid: Oid(oid + 1000),
            name: name.to_string(),
            definition: "EXCLUDE USING gist (room WITH =)".to_string(),
            is_primary: false,
            is_unique: false,
        }),
    }
}
