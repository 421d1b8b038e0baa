// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object filtering.
//!
//! A [`FilterSpec`] is what the operator supplies (exclusions by schema and
//! by qualified table name); the [`FilterSet`] is its resolution against the
//! fetched catalog: the set of OIDs and archive restore-list names that must
//! be skipped on the target. Filter decisions never change mid-run.

use crate::catalog::Oid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Operator-supplied filtering rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterSpec {
    /// Schemas whose objects are excluded entirely.
    pub exclude_schemas: Vec<String>,
    /// Qualified `schema.table` names to exclude.
    pub exclude_tables: Vec<String>,
    /// Qualified `schema.index` names to exclude.
    pub exclude_indexes: Vec<String>,
    /// When non-empty, only these qualified table names are retained.
    pub include_only_tables: Vec<String>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self == &FilterSpec::default()
    }

    /// Does this spec exclude the given table?
    pub fn excludes_table(&self, nspname: &str, relname: &str) -> bool {
        let qname = format!("{nspname}.{relname}");
        if self.exclude_schemas.iter().any(|s| s == nspname) {
            return true;
        }
        if self.exclude_tables.iter().any(|t| t == &qname) {
            return true;
        }
        !self.include_only_tables.is_empty()
            && !self.include_only_tables.iter().any(|t| t == &qname)
    }

    pub fn excludes_index(&self, nspname: &str, relname: &str) -> bool {
        let qname = format!("{nspname}.{relname}");
        self.exclude_schemas.iter().any(|s| s == nspname)
            || self.exclude_indexes.iter().any(|i| i == &qname)
    }

    pub fn excludes_schema(&self, nspname: &str) -> bool {
        self.exclude_schemas.iter().any(|s| s == nspname)
    }
}

/// Resolved filter decisions: objects that must not be restored.
///
/// Lookups are by OID and by the archive's "name owner" string (the tail of
/// a restore-list entry), because not every archive entry carries the OID
/// of the object it creates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSet {
    oids: HashSet<u32>,
    restore_names: HashSet<String>,
}

impl FilterSet {
    pub fn insert_oid(&mut self, oid: Oid) {
        self.oids.insert(oid.0);
    }

    /// Register the `schema name owner` string an archive entry would carry.
    pub fn insert_restore_name(&mut self, restore_name: impl Into<String>) {
        self.restore_names.insert(restore_name.into());
    }

    pub fn contains_oid(&self, oid: Oid) -> bool {
        self.oids.contains(&oid.0)
    }

    pub fn contains_restore_name(&self, restore_name: &str) -> bool {
        self.restore_names.contains(restore_name)
    }

    /// Is this object excluded from the target?
    pub fn is_filtered_out(&self, oid: Oid, restore_name: &str) -> bool {
        self.contains_oid(oid) || self.contains_restore_name(restore_name)
    }

    pub fn len(&self) -> usize {
        self.oids.len().max(self.restore_names.len())
    }

    pub fn is_empty(&self) -> bool {
        self.oids.is_empty() && self.restore_names.is_empty()
    }
}

#[cfg(test)]
#[path = "filter_tests.rs"]
mod tests;
