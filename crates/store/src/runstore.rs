// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable per-unit progress markers.
//!
//! Every unit of work (a table part, an index build, a constraint, a dump
//! section, a vacuum) has two files under `run/`: a lock file holding the
//! claiming worker's PID and a JSON summary, and a done marker written
//! atomically on completion. The done marker is the single source of truth
//! for "this unit is finished"; a lock whose holder is no longer alive may
//! be broken by any claimer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::files::{self, FileError};
use pgferry_core::Oid;

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What kind of work a marker tracks. Part of the marker file name so OIDs
/// from different catalogs never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    TablePart,
    /// The one-time truncate of a partitioned table's target.
    Truncate,
    Index,
    Constraint,
    Vacuum,
    Section,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::TablePart => "table",
            UnitKind::Truncate => "truncate",
            UnitKind::Index => "index",
            UnitKind::Constraint => "constraint",
            UnitKind::Vacuum => "vacuum",
            UnitKind::Section => "section",
        };
        write!(f, "{name}")
    }
}

/// One claimable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub kind: UnitKind,
    /// Stable marker key, unique across the run.
    pub key: String,
    /// Human-readable name for logs and lock summaries.
    pub name: String,
}

impl WorkUnit {
    pub fn table_part(oid: Oid, part_number: u32, part_count: u32, name: &str) -> Self {
        let key = if part_count > 1 {
            format!("table.{oid}.{part_number}")
        } else {
            format!("table.{oid}")
        };
        WorkUnit {
            kind: UnitKind::TablePart,
            key,
            name: name.to_string(),
        }
    }

    pub fn truncate(oid: Oid, name: &str) -> Self {
        WorkUnit {
            kind: UnitKind::Truncate,
            key: format!("truncate.{oid}"),
            name: name.to_string(),
        }
    }

    pub fn index(oid: Oid, name: &str) -> Self {
        WorkUnit {
            kind: UnitKind::Index,
            key: format!("index.{oid}"),
            name: name.to_string(),
        }
    }

    pub fn constraint(oid: Oid, name: &str) -> Self {
        WorkUnit {
            kind: UnitKind::Constraint,
            key: format!("constraint.{oid}"),
            name: name.to_string(),
        }
    }

    pub fn vacuum(oid: Oid, name: &str) -> Self {
        WorkUnit {
            kind: UnitKind::Vacuum,
            key: format!("vacuum.{oid}"),
            name: name.to_string(),
        }
    }

    pub fn section(section: &str) -> Self {
        WorkUnit {
            kind: UnitKind::Section,
            key: format!("section.{section}"),
            name: section.to_string(),
        }
    }
}

/// Serialized into the lock file when a unit is claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSummary {
    pub pid: u32,
    pub kind: UnitKind,
    pub key: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the unit and must `mark_done` or `release` it.
    Acquired,
    /// A done marker exists; skip the work.
    AlreadyDone,
    /// A live worker holds the lock; skip the work.
    Busy { holder: u32 },
}

/// Progress marker storage.
///
/// The filesystem backend is the operator contract; the in-memory backend
/// exists so scheduler logic is testable hermetically.
pub trait RunStore: Send + Sync {
    fn claim(&self, unit: &WorkUnit) -> Result<Claim, RunStoreError>;
    /// Atomically record completion and drop the lock.
    fn mark_done(&self, unit: &WorkUnit) -> Result<(), RunStoreError>;
    /// Drop the lock without recording completion (failure path).
    fn release(&self, unit: &WorkUnit) -> Result<(), RunStoreError>;
    fn is_done(&self, unit: &WorkUnit) -> bool;
    fn read_lock(&self, unit: &WorkUnit) -> Result<Option<LockSummary>, RunStoreError>;
}

/// Filesystem-backed progress markers under `run/`.
pub struct FsRunStore {
    run_dir: PathBuf,
    /// Serializes the lock-check-then-write window between in-process
    /// workers; cross-process claimers are covered by the PID liveness
    /// probe on the lock file.
    claim_mutex: Mutex<()>,
    pid_alive: fn(u32) -> bool,
}

impl FsRunStore {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        FsRunStore {
            run_dir: run_dir.into(),
            claim_mutex: Mutex::new(()),
            pid_alive: crate::workdir::pid_is_alive,
        }
    }

    /// Substitute the PID liveness probe (tests).
    pub fn with_liveness_probe(mut self, probe: fn(u32) -> bool) -> Self {
        self.pid_alive = probe;
        self
    }

    fn lock_path(&self, unit: &WorkUnit) -> PathBuf {
        self.run_dir.join(&unit.key)
    }

    fn done_path(&self, unit: &WorkUnit) -> PathBuf {
        self.run_dir.join(format!("{}.done", unit.key))
    }

    fn remove_if_present(path: &Path) -> Result<(), RunStoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RunStoreError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl RunStore for FsRunStore {
    fn claim(&self, unit: &WorkUnit) -> Result<Claim, RunStoreError> {
        let _guard = self.claim_mutex.lock();

        if self.done_path(unit).exists() {
            return Ok(Claim::AlreadyDone);
        }

        let lock_path = self.lock_path(unit);
        if let Some(summary) = files::read_json::<LockSummary>(&lock_path)? {
            if (self.pid_alive)(summary.pid) {
                return Ok(Claim::Busy {
                    holder: summary.pid,
                });
            }
            warn!(
                unit = %unit.key,
                stale_pid = summary.pid,
                "breaking stale lock left by dead process"
            );
            Self::remove_if_present(&lock_path)?;
        }

        let summary = LockSummary {
            pid: std::process::id(),
            kind: unit.kind,
            key: unit.key.clone(),
            name: unit.name.clone(),
            started_at: Utc::now(),
        };
        files::atomic_write_json(&lock_path, &summary)?;
        Ok(Claim::Acquired)
    }

    fn mark_done(&self, unit: &WorkUnit) -> Result<(), RunStoreError> {
        #[derive(Serialize)]
        struct DoneRecord<'a> {
            pid: u32,
            key: &'a str,
            finished_at: DateTime<Utc>,
        }
        files::atomic_write_json(
            &self.done_path(unit),
            &DoneRecord {
                pid: std::process::id(),
                key: &unit.key,
                finished_at: Utc::now(),
            },
        )?;
        Self::remove_if_present(&self.lock_path(unit))
    }

    fn release(&self, unit: &WorkUnit) -> Result<(), RunStoreError> {
        Self::remove_if_present(&self.lock_path(unit))
    }

    fn is_done(&self, unit: &WorkUnit) -> bool {
        self.done_path(unit).exists()
    }

    fn read_lock(&self, unit: &WorkUnit) -> Result<Option<LockSummary>, RunStoreError> {
        Ok(files::read_json(&self.lock_path(unit))?)
    }
}

#[derive(Default)]
struct MemUnit {
    done: bool,
    lock: Option<LockSummary>,
}

/// In-memory progress markers for hermetic tests.
#[derive(Default)]
pub struct MemRunStore {
    units: Mutex<HashMap<String, MemUnit>>,
    dead_pids: Mutex<Vec<u32>>,
}

impl MemRunStore {
    pub fn new() -> Self {
        MemRunStore::default()
    }

    /// Declare a PID dead so its locks count as stale.
    pub fn declare_dead(&self, pid: u32) {
        self.dead_pids.lock().push(pid);
    }

    /// Plant a lock owned by another process (crash simulation).
    pub fn plant_lock(&self, unit: &WorkUnit, pid: u32) {
        let mut units = self.units.lock();
        units.entry(unit.key.clone()).or_default().lock = Some(LockSummary {
            pid,
            kind: unit.kind,
            key: unit.key.clone(),
            name: unit.name.clone(),
            started_at: Utc::now(),
        });
    }

    pub fn done_keys(&self) -> Vec<String> {
        let units = self.units.lock();
        let mut keys: Vec<_> = units
            .iter()
            .filter(|(_, u)| u.done)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl RunStore for MemRunStore {
    fn claim(&self, unit: &WorkUnit) -> Result<Claim, RunStoreError> {
        let mut units = self.units.lock();
        let entry = units.entry(unit.key.clone()).or_default();
        if entry.done {
            return Ok(Claim::AlreadyDone);
        }
        if let Some(summary) = &entry.lock {
            let stale = self.dead_pids.lock().contains(&summary.pid);
            if !stale {
                return Ok(Claim::Busy {
                    holder: summary.pid,
                });
            }
            warn!(unit = %unit.key, stale_pid = summary.pid, "breaking stale lock");
        }
        entry.lock = Some(LockSummary {
            pid: std::process::id(),
            kind: unit.kind,
            key: unit.key.clone(),
            name: unit.name.clone(),
            started_at: Utc::now(),
        });
        Ok(Claim::Acquired)
    }

    fn mark_done(&self, unit: &WorkUnit) -> Result<(), RunStoreError> {
        let mut units = self.units.lock();
        let entry = units.entry(unit.key.clone()).or_default();
        entry.done = true;
        entry.lock = None;
        Ok(())
    }

    fn release(&self, unit: &WorkUnit) -> Result<(), RunStoreError> {
        let mut units = self.units.lock();
        if let Some(entry) = units.get_mut(&unit.key) {
            entry.lock = None;
        }
        Ok(())
    }

    fn is_done(&self, unit: &WorkUnit) -> bool {
        self.units
            .lock()
            .get(&unit.key)
            .is_some_and(|u| u.done)
    }

    fn read_lock(&self, unit: &WorkUnit) -> Result<Option<LockSummary>, RunStoreError> {
        Ok(self
            .units
            .lock()
            .get(&unit.key)
            .and_then(|u| u.lock.clone()))
    }
}

#[cfg(test)]
#[path = "runstore_tests.rs"]
mod tests;
