// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive table-of-contents parsing and restore-list filtering.
//!
//! `pg_restore --list` prints one entry per archive object:
//!
//! ```text
//! 215; 1259 16387 TABLE public t postgres
//! 3; 2615 16386 SCHEMA - archive postgres
//! 2345; 0 0 COMMENT - EXTENSION plpgsql
//! ```
//!
//! Filtering comments an entry out by prefixing its line with `;`.
//! A commented entry is skipped by the restore tool; everything else in
//! the file is preserved verbatim so the filtered list stays diffable
//! against the original.

use pgferry_core::Oid;
use pgferry_store::{CatalogStore, RunStore, WorkUnit};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Entry descriptors that may span multiple tokens.
const MULTIWORD_DESCS: [&str; 6] = [
    "FK CONSTRAINT",
    "TABLE DATA",
    "SEQUENCE SET",
    "SEQUENCE OWNED BY",
    "DEFAULT ACL",
    "MATERIALIZED VIEW",
];

/// One parsed TOC entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub dump_id: u32,
    pub catalog_oid: u32,
    pub object_oid: u32,
    pub desc: String,
    pub namespace: String,
    pub name: String,
    pub owner: String,
    pub raw: String,
}

impl ArchiveEntry {
    /// The "schema name owner" string the filter set matches against.
    pub fn restore_name(&self) -> String {
        format!("{} {} {}", self.namespace, self.name, self.owner)
    }

    /// Parse one listing line; `None` for comments and non-entry lines.
    pub fn parse(line: &str) -> Option<ArchiveEntry> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            return None;
        }
        let (dump_id, rest) = trimmed.split_once(';')?;
        let dump_id: u32 = dump_id.trim().parse().ok()?;

        let mut tokens = rest.split_whitespace();
        let catalog_oid: u32 = tokens.next()?.parse().ok()?;
        let object_oid: u32 = tokens.next()?.parse().ok()?;
        let remainder: Vec<&str> = tokens.collect();
        if remainder.len() < 2 {
            return None;
        }

        // The descriptor is one token, or one of the known multiword
        // forms; what follows is `namespace name owner` (owner may be
        // absent for some entry kinds).
        let joined = remainder.join(" ");
        let desc_len = MULTIWORD_DESCS
            .iter()
            .find(|d| joined.starts_with(**d))
            .map(|d| d.split_whitespace().count())
            .unwrap_or(1);
        if remainder.len() < desc_len + 1 {
            return None;
        }
        let desc = remainder[..desc_len].join(" ");
        let tail = &remainder[desc_len..];

        let (namespace, name, owner) = match tail {
            [namespace] => (*namespace, String::new(), ""),
            [namespace, name] => (*namespace, (*name).to_string(), ""),
            [namespace, middle @ .., owner] => (*namespace, middle.join(" "), *owner),
            [] => return None,
        };

        Some(ArchiveEntry {
            dump_id,
            catalog_oid,
            object_oid,
            desc,
            namespace: namespace.to_string(),
            name,
            owner: owner.to_string(),
            raw: trimmed.to_string(),
        })
    }
}

/// Why an entry was commented out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A done marker says the object is already built on the target.
    AlreadyDone,
    /// The object is in the filter set.
    FilteredOut,
    /// `COMMENT ON EXTENSION` with extension handling disabled.
    ExtensionComment,
    /// The schema already exists on the target.
    SchemaExists,
}

/// One line of the filtered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListLine {
    /// Preserved verbatim (comments, blank lines).
    Verbatim(String),
    /// A retained entry.
    Keep(ArchiveEntry),
    /// A skipped entry, written commented out.
    Skip(ArchiveEntry, SkipReason),
}

/// Decision inputs for restore-list filtering.
pub struct ListFilter<'a> {
    pub run_store: &'a dyn RunStore,
    pub catalog: &'a CatalogStore,
    /// Schemas that already exist on the target.
    pub existing_schemas: &'a HashSet<String>,
    pub skip_extension_comments: bool,
}

impl ListFilter<'_> {
    /// The progress-marker unit an entry corresponds to, when one exists.
    fn unit_for(entry: &ArchiveEntry) -> Option<WorkUnit> {
        let oid = Oid(entry.object_oid);
        match entry.desc.as_str() {
            "INDEX" => Some(WorkUnit::index(oid, &entry.name)),
            "CONSTRAINT" | "FK CONSTRAINT" => Some(WorkUnit::constraint(oid, &entry.name)),
            _ => None,
        }
    }

    fn decide(&self, entry: &ArchiveEntry) -> Option<SkipReason> {
        if let Some(unit) = Self::unit_for(entry) {
            if self.run_store.is_done(&unit) {
                return Some(SkipReason::AlreadyDone);
            }
        }

        let oid = Oid(entry.object_oid);
        // Sequences are matched by OID only: their archive names (SEQUENCE
        // SET, OWNED BY) repeat across entry kinds and must never pull a
        // retained sequence out via a name collision.
        let filtered = if entry.desc.starts_with("SEQUENCE") {
            self.catalog.filter().contains_oid(oid)
        } else {
            self.catalog.is_filtered_out(oid, &entry.restore_name())
        };
        if filtered {
            return Some(SkipReason::FilteredOut);
        }

        if self.skip_extension_comments
            && entry.desc == "COMMENT"
            && entry.name.starts_with("EXTENSION")
        {
            return Some(SkipReason::ExtensionComment);
        }

        if entry.desc == "SCHEMA" && self.existing_schemas.contains(&entry.name) {
            return Some(SkipReason::SchemaExists);
        }

        None
    }

    /// Filter a whole listing.
    pub fn filter_listing(&self, listing: &str) -> Vec<ListLine> {
        listing
            .lines()
            .map(|line| match ArchiveEntry::parse(line) {
                None => ListLine::Verbatim(line.to_string()),
                Some(entry) => match self.decide(&entry) {
                    Some(reason) => ListLine::Skip(entry, reason),
                    None => ListLine::Keep(entry),
                },
            })
            .collect()
    }
}

/// Render filtered lines back into restore-list text.
pub fn render_list(lines: &[ListLine]) -> String {
    let mut out = String::new();
    for line in lines {
        match line {
            ListLine::Verbatim(text) => {
                let _ = writeln!(out, "{text}");
            }
            ListLine::Keep(entry) => {
                let _ = writeln!(out, "{}", entry.raw);
            }
            ListLine::Skip(entry, _) => {
                let _ = writeln!(out, ";{}", entry.raw);
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "listfile_tests.rs"]
mod tests;
