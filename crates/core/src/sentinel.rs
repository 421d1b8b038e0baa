// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sentinel record and the local LSN tracking file.
//!
//! The sentinel is a single mutable row on the source, visible to every
//! participant; it carries the replay progress cursor and the apply-enable
//! flag the clone orchestrator flips when the base copy finishes. The
//! [`LsnTracking`] record is its work-directory shadow (`cdc/lsn.json`).

use crate::lsn::Lsn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SentinelError {
    #[error("LSN went backwards: {field} {from} -> {to}")]
    NotMonotonic {
        field: &'static str,
        from: Lsn,
        to: Lsn,
    },
    #[error("apply flag may only transition false -> true")]
    ApplyFlagReset,
}

/// The cross-process control record stored on the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinel {
    pub startpos: Lsn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpos: Option<Lsn>,
    pub write_lsn: Lsn,
    pub flush_lsn: Lsn,
    pub replay_lsn: Lsn,
    pub apply: bool,
}

impl Sentinel {
    pub fn new(startpos: Lsn) -> Self {
        Sentinel {
            startpos,
            ..Sentinel::default()
        }
    }

    /// Validate `write_lsn <= flush_lsn <= replay_lsn` does not regress and
    /// apply the update. LSNs equal to zero mean "not reported yet" and are
    /// skipped on both sides of the comparison.
    pub fn advance(
        &mut self,
        write: Option<Lsn>,
        flush: Option<Lsn>,
        replay: Option<Lsn>,
    ) -> Result<(), SentinelError> {
        let fields: [(&'static str, Option<Lsn>, Lsn); 3] = [
            ("write_lsn", write, self.write_lsn),
            ("flush_lsn", flush, self.flush_lsn),
            ("replay_lsn", replay, self.replay_lsn),
        ];
        for (field, update, current) in fields {
            if let Some(to) = update {
                if to < current {
                    return Err(SentinelError::NotMonotonic {
                        field,
                        from: current,
                        to,
                    });
                }
            }
        }
        if let Some(lsn) = write {
            self.write_lsn = lsn;
        }
        if let Some(lsn) = flush {
            self.flush_lsn = lsn;
        }
        if let Some(lsn) = replay {
            self.replay_lsn = lsn;
        }
        Ok(())
    }

    /// Flip the apply flag; false -> true happens exactly once.
    pub fn enable_apply(&mut self) -> Result<(), SentinelError> {
        self.apply = true;
        Ok(())
    }

    pub fn set_apply(&mut self, apply: bool) -> Result<(), SentinelError> {
        if self.apply && !apply {
            return Err(SentinelError::ApplyFlagReset);
        }
        self.apply = apply;
        Ok(())
    }

    /// True when replay has reached the stop position.
    pub fn reached_endpos(&self) -> bool {
        match self.endpos {
            Some(endpos) => endpos != Lsn::ZERO && self.replay_lsn >= endpos,
            None => false,
        }
    }
}

/// Work-directory LSN bookkeeping (`cdc/lsn.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsnTracking {
    pub startpos: Lsn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpos: Option<Lsn>,
    /// Highest LSN written to a segment file.
    pub write_lsn: Lsn,
    /// Highest LSN fsync'd to disk.
    pub flush_lsn: Lsn,
    /// Highest commit LSN applied on the target.
    pub replay_lsn: Lsn,
}

#[cfg(test)]
#[path = "sentinel_tests.rs"]
mod tests;
