// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source catalog model.
//!
//! These records are fetched once per run from the source catalog under the
//! held snapshot, persisted in the catalog store, and read-only thereafter.

use crate::sqltext::quote_ident;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A source object identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Oid(pub u32);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Oid {
    fn from(v: u32) -> Self {
        Oid(v)
    }
}

/// One attribute (column) of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttr {
    pub attnum: i16,
    pub name: String,
    pub type_oid: u32,
    /// Member of the table's primary key.
    pub is_pkey: bool,
}

/// The key a table slice ranges over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKey {
    /// A single integer column, usually the primary key.
    Column(String),
    /// Physical row locator ranges over block numbers, for tables without
    /// a usable ordered key.
    Ctid,
}

/// One slice of a table copy.
///
/// `part_count == 1` means the whole table; otherwise the slice covers the
/// half-open range `[min, max)` over the part key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePart {
    pub part_number: u32,
    pub part_count: u32,
    pub key: PartKey,
    pub min: i64,
    pub max: i64,
}

impl TablePart {
    /// A descriptor for an unpartitioned copy.
    pub fn whole() -> Self {
        TablePart {
            part_number: 1,
            part_count: 1,
            key: PartKey::Ctid,
            min: 0,
            max: 0,
        }
    }

    pub fn is_whole(&self) -> bool {
        self.part_count <= 1
    }

    /// The WHERE clause selecting this slice, or `None` for a whole-table copy.
    pub fn where_clause(&self) -> Option<String> {
        if self.is_whole() {
            return None;
        }
        Some(match &self.key {
            PartKey::Column(name) => format!(
                "{} >= {} AND {} < {}",
                quote_ident(name),
                self.min,
                quote_ident(name),
                self.max
            ),
            PartKey::Ctid => format!("ctid >= '({},0)' AND ctid < '({},0)'", self.min, self.max),
        })
    }
}

/// Split a table into equal-width slices over `[min, max]`.
///
/// `part_count` must be at least 2; ranges are half-open and the last range
/// is widened to `max + 1` so the maximum key value is covered.
pub fn plan_column_parts(key: &str, min: i64, max: i64, part_count: u32) -> Vec<TablePart> {
    let span = (max - min + 1).max(1);
    let divisor = i64::from(part_count);
    let width = ((span + divisor - 1) / divisor).max(1);
    (0..part_count)
        .map(|n| TablePart {
            part_number: n + 1,
            part_count,
            key: PartKey::Column(key.to_string()),
            min: min + i64::from(n) * width,
            max: if n + 1 == part_count {
                max + 1
            } else {
                min + i64::from(n + 1) * width
            },
        })
        .collect()
}

/// Split a table into block-range slices over its physical pages.
pub fn plan_ctid_parts(relpages: i64, part_count: u32) -> Vec<TablePart> {
    let divisor = i64::from(part_count);
    let width = ((relpages.max(1) + divisor - 1) / divisor).max(1);
    (0..part_count)
        .map(|n| TablePart {
            part_number: n + 1,
            part_count,
            key: PartKey::Ctid,
            min: i64::from(n) * width,
            // The last range is open-ended past relpages so growth between
            // estimate and copy is still covered.
            max: if n + 1 == part_count {
                i64::MAX
            } else {
                i64::from(n + 1) * width
            },
        })
        .collect()
}

/// A source table retained for copying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    pub oid: Oid,
    pub nspname: String,
    pub relname: String,
    /// Planner row-count estimate.
    pub reltuples: i64,
    /// On-disk size estimate in bytes.
    pub bytes: u64,
    pub relpages: i64,
    pub amname: String,
    pub attrs: Vec<SourceAttr>,
    /// Slices this table is copied as; a single whole-table part when the
    /// table is below the split threshold.
    pub parts: Vec<TablePart>,
}

impl SourceTable {
    /// Qualified, quoted name usable in SQL text.
    pub fn qname(&self) -> String {
        format!("{}.{}", quote_ident(&self.nspname), quote_ident(&self.relname))
    }

    pub fn pkey_attrs(&self) -> impl Iterator<Item = &SourceAttr> {
        self.attrs.iter().filter(|a| a.is_pkey)
    }

    pub fn is_partitioned(&self) -> bool {
        self.parts.len() > 1
    }
}

/// Constraint details attached to an index that backs one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConstraint {
    pub oid: Oid,
    pub name: String,
    pub definition: String,
    pub is_primary: bool,
    pub is_unique: bool,
}

/// A source index retained for rebuilding on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIndex {
    pub oid: Oid,
    pub table_oid: Oid,
    pub nspname: String,
    pub relname: String,
    /// The source's textual `CREATE INDEX` definition.
    pub definition: String,
    pub is_unique: bool,
    pub constraint: Option<IndexConstraint>,
}

impl SourceIndex {
    pub fn qname(&self) -> String {
        format!("{}.{}", quote_ident(&self.nspname), quote_ident(&self.relname))
    }

    /// An index whose only purpose is backing a non-unique, non-primary
    /// constraint is created by the constraint DDL itself.
    pub fn creation_deferred_to_constraint(&self) -> bool {
        match &self.constraint {
            Some(c) => !c.is_primary && !c.is_unique,
            None => false,
        }
    }
}

/// A source sequence, re-synced after the clone and after CDC apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSequence {
    pub oid: Oid,
    pub nspname: String,
    pub relname: String,
    pub owner_table: Option<Oid>,
    pub last_value: i64,
    pub is_called: bool,
}

impl SourceSequence {
    pub fn qname(&self) -> String {
        format!("{}.{}", quote_ident(&self.nspname), quote_ident(&self.relname))
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
