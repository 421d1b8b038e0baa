// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The work-directory shadow of the sentinel (`cdc/lsn.json`).
//!
//! Receive and apply both update this record; every update re-validates
//! monotonicity before anything lands on disk.

use std::path::{Path, PathBuf};

use crate::files::{self, FileError};
use pgferry_core::sentinel::SentinelError;
use pgferry_core::{Lsn, LsnTracking};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LsnFileError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Sentinel(#[from] SentinelError),
}

/// Durable LSN bookkeeping for the CDC pipeline.
pub struct LsnFile {
    path: PathBuf,
    tracking: LsnTracking,
}

impl LsnFile {
    /// Open the tracking file, or start fresh from `startpos`.
    pub fn open(path: &Path, startpos: Lsn) -> Result<Self, LsnFileError> {
        let tracking = files::read_json::<LsnTracking>(path)?.unwrap_or(LsnTracking {
            startpos,
            ..LsnTracking::default()
        });
        Ok(LsnFile {
            path: path.to_path_buf(),
            tracking,
        })
    }

    pub fn tracking(&self) -> &LsnTracking {
        &self.tracking
    }

    pub fn set_endpos(&mut self, endpos: Option<Lsn>) -> Result<(), LsnFileError> {
        self.tracking.endpos = endpos;
        self.write()
    }

    /// Advance any of the three cursors; regression is an error and the
    /// file is left untouched.
    pub fn advance(
        &mut self,
        write: Option<Lsn>,
        flush: Option<Lsn>,
        replay: Option<Lsn>,
    ) -> Result<(), LsnFileError> {
        let checks: [(Option<Lsn>, Lsn); 3] = [
            (write, self.tracking.write_lsn),
            (flush, self.tracking.flush_lsn),
            (replay, self.tracking.replay_lsn),
        ];
        for (field, (update, current)) in ["write_lsn", "flush_lsn", "replay_lsn"]
            .into_iter()
            .zip(checks)
        {
            if let Some(to) = update {
                if to < current {
                    return Err(SentinelError::NotMonotonic {
                        field,
                        from: current,
                        to,
                    }
                    .into());
                }
            }
        }
        if let Some(lsn) = write {
            self.tracking.write_lsn = lsn;
        }
        if let Some(lsn) = flush {
            self.tracking.flush_lsn = lsn;
        }
        if let Some(lsn) = replay {
            self.tracking.replay_lsn = lsn;
        }
        self.write()
    }

    /// Persist, merging with whatever is on disk: receive and apply hold
    /// separate handles on this file and each only moves its own
    /// cursors, so the surviving record takes the max of every cursor.
    fn write(&mut self) -> Result<(), LsnFileError> {
        if let Some(on_disk) = files::read_json::<LsnTracking>(&self.path)? {
            self.tracking.write_lsn = self.tracking.write_lsn.max(on_disk.write_lsn);
            self.tracking.flush_lsn = self.tracking.flush_lsn.max(on_disk.flush_lsn);
            self.tracking.replay_lsn = self.tracking.replay_lsn.max(on_disk.replay_lsn);
            if self.tracking.endpos.is_none() {
                self.tracking.endpos = on_disk.endpos;
            }
        }
        files::atomic_write_json(&self.path, &self.tracking)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "lsnfile_tests.rs"]
mod tests;
