// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The catalog store.
//!
//! Holds everything fetched from the source catalog under the run's
//! snapshot: retained tables (with their copy slices), indexes,
//! constraints, sequences, schema-level settings, and the resolved filter
//! decisions. Populated once per run, append-only afterwards, persisted to
//! `schema.json` so a restarted process resumes against identical
//! decisions. Readable concurrently; writes are serialized by the inner
//! lock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::files::{self, FileError};
use pgferry_core::{FilterSet, FilterSpec, Oid, SourceIndex, SourceSequence, SourceTable};

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("duplicate object OID {0} in catalog")]
    DuplicateOid(Oid),
    #[error("catalog store is not populated")]
    NotPopulated,
    #[error("filter rules changed since the previous run (expected fingerprint {expected}, got {actual}); use --restart")]
    FilterChanged { expected: String, actual: String },
    #[error(transparent)]
    File(#[from] FileError),
}

/// The persisted form of the catalog store (`schema.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub version: u32,
    pub fetched_at: Option<DateTime<Utc>>,
    /// The exported transaction snapshot this catalog was read under.
    pub snapshot_id: Option<String>,
    /// Retained schema names.
    pub schemas: Vec<String>,
    pub extensions: Vec<String>,
    /// `ALTER DATABASE ... SET` / `ALTER ROLE ... IN DATABASE ... SET`
    /// statements copied from the source.
    pub database_settings: Vec<String>,
    /// Retained tables, largest estimated size first, OID ascending ties.
    pub tables: Vec<SourceTable>,
    pub indexes: Vec<SourceIndex>,
    pub sequences: Vec<SourceSequence>,
    pub filter: FilterSet,
    pub filter_fingerprint: String,
}

#[derive(Default)]
struct Inner {
    snapshot: SchemaSnapshot,
    populated: bool,
    table_by_oid: HashMap<u32, usize>,
    table_by_name: HashMap<(String, String), usize>,
    index_by_oid: HashMap<u32, usize>,
    indexes_of_table: HashMap<u32, Vec<usize>>,
}

/// Shared, lock-protected catalog of the source schema.
#[derive(Default)]
pub struct CatalogStore {
    inner: Mutex<Inner>,
}

impl CatalogStore {
    pub fn new() -> Self {
        CatalogStore::default()
    }

    /// Stable fingerprint of the operator's filter rules, persisted so a
    /// resume with different rules is refused.
    pub fn filter_fingerprint(spec: &FilterSpec) -> String {
        let json = serde_json::to_string(spec).unwrap_or_default();
        let digest = Sha256::digest(json.as_bytes());
        format!("{digest:x}")
    }

    /// Install the fetched catalog. Tables are ordered largest-first with
    /// OID ascending tie-breaks; `(catalog, object OID)` uniqueness is
    /// enforced here.
    pub fn populate(&self, mut snapshot: SchemaSnapshot) -> Result<(), CatalogError> {
        snapshot.version = CURRENT_SCHEMA_VERSION;
        if snapshot.fetched_at.is_none() {
            snapshot.fetched_at = Some(Utc::now());
        }
        snapshot
            .tables
            .sort_by(|a, b| b.bytes.cmp(&a.bytes).then(a.oid.cmp(&b.oid)));

        let mut inner = self.inner.lock();
        let mut rebuilt = Inner {
            snapshot,
            populated: true,
            ..Inner::default()
        };
        for (pos, table) in rebuilt.snapshot.tables.iter().enumerate() {
            if rebuilt.table_by_oid.insert(table.oid.0, pos).is_some() {
                return Err(CatalogError::DuplicateOid(table.oid));
            }
            rebuilt
                .table_by_name
                .insert((table.nspname.clone(), table.relname.clone()), pos);
        }
        for (pos, index) in rebuilt.snapshot.indexes.iter().enumerate() {
            if rebuilt.index_by_oid.insert(index.oid.0, pos).is_some() {
                return Err(CatalogError::DuplicateOid(index.oid));
            }
            rebuilt
                .indexes_of_table
                .entry(index.table_oid.0)
                .or_default()
                .push(pos);
        }
        *inner = rebuilt;
        Ok(())
    }

    pub fn is_populated(&self) -> bool {
        self.inner.lock().populated
    }

    /// Retained tables in copy order (largest first).
    pub fn tables(&self) -> Vec<SourceTable> {
        self.inner.lock().snapshot.tables.clone()
    }

    pub fn table_by_oid(&self, oid: Oid) -> Option<SourceTable> {
        let inner = self.inner.lock();
        inner
            .table_by_oid
            .get(&oid.0)
            .map(|&pos| inner.snapshot.tables[pos].clone())
    }

    pub fn table_by_name(&self, nspname: &str, relname: &str) -> Option<SourceTable> {
        let inner = self.inner.lock();
        inner
            .table_by_name
            .get(&(nspname.to_string(), relname.to_string()))
            .map(|&pos| inner.snapshot.tables[pos].clone())
    }

    /// Primary-key attribute names of a table, in attribute order.
    pub fn pkey_attrs(&self, nspname: &str, relname: &str) -> Vec<String> {
        self.table_by_name(nspname, relname)
            .map(|t| t.pkey_attrs().map(|a| a.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn indexes(&self) -> Vec<SourceIndex> {
        self.inner.lock().snapshot.indexes.clone()
    }

    pub fn index_by_oid(&self, oid: Oid) -> Option<SourceIndex> {
        let inner = self.inner.lock();
        inner
            .index_by_oid
            .get(&oid.0)
            .map(|&pos| inner.snapshot.indexes[pos].clone())
    }

    /// Indexes of one table, in catalog order.
    pub fn indexes_of(&self, table_oid: Oid) -> Vec<SourceIndex> {
        let inner = self.inner.lock();
        inner
            .indexes_of_table
            .get(&table_oid.0)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&pos| inner.snapshot.indexes[pos].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sequences(&self) -> Vec<SourceSequence> {
        self.inner.lock().snapshot.sequences.clone()
    }

    pub fn schemas(&self) -> Vec<String> {
        self.inner.lock().snapshot.schemas.clone()
    }

    pub fn database_settings(&self) -> Vec<String> {
        self.inner.lock().snapshot.database_settings.clone()
    }

    pub fn snapshot_id(&self) -> Option<String> {
        self.inner.lock().snapshot.snapshot_id.clone()
    }

    /// Is this object excluded from the target?
    pub fn is_filtered_out(&self, oid: Oid, restore_name: &str) -> bool {
        self.inner
            .lock()
            .snapshot
            .filter
            .is_filtered_out(oid, restore_name)
    }

    pub fn filter(&self) -> FilterSet {
        self.inner.lock().snapshot.filter.clone()
    }

    /// Persist to `schema.json` (atomic write + fsync).
    pub fn persist(&self, path: &Path) -> Result<(), CatalogError> {
        let inner = self.inner.lock();
        if !inner.populated {
            return Err(CatalogError::NotPopulated);
        }
        files::atomic_write_json(path, &inner.snapshot)?;
        Ok(())
    }

    /// Load a previously persisted catalog, verifying the filter rules
    /// still match.
    pub fn load(&self, path: &Path, filter_spec: &FilterSpec) -> Result<(), CatalogError> {
        let snapshot: SchemaSnapshot =
            files::read_json(path)?.ok_or(CatalogError::NotPopulated)?;
        let actual = Self::filter_fingerprint(filter_spec);
        if snapshot.filter_fingerprint != actual {
            return Err(CatalogError::FilterChanged {
                expected: snapshot.filter_fingerprint,
                actual,
            });
        }
        self.populate(snapshot)
    }

    /// Load without verifying filter rules, for read-only consumers of a
    /// finished run (follow, standalone index builds).
    pub fn load_unchecked(&self, path: &Path) -> Result<(), CatalogError> {
        let snapshot: SchemaSnapshot =
            files::read_json(path)?.ok_or(CatalogError::NotPopulated)?;
        self.populate(snapshot)
    }
}

#[cfg(test)]
#[path = "catalog_store_tests.rs"]
mod tests;
