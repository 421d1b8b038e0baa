// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The apply stage.
//!
//! Single-threaded, source-commit-ordered replay of the transformed SQL
//! files. The replication origin is advanced inside the same target
//! transaction as the DML (`pg_replication_origin_xact_setup` before
//! COMMIT), so a crash can never double-apply: a transaction with commit
//! LSN L is applied iff `replay_lsn < L <= endpos` (endpos unset meaning
//! no bound). Keepalives advance the origin through an empty transaction;
//! `SWITCH WAL` hands control back so the caller opens the next file.

use pgferry_core::Lsn;
use pgferry_pgsql::origin::xact_setup_sql;
use pgferry_pgsql::{ExecError, OriginTracker, SqlExecutor};
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("apply: {0}")]
    Exec(#[from] ExecError),
    #[error("bad replay line {line:?}: {what}")]
    BadLine { line: String, what: &'static str },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One parsed line of a `.sql` replay file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyInstruction {
    Begin {
        xid: u32,
        lsn: Lsn,
        commit_lsn: Option<Lsn>,
    },
    Commit {
        xid: u32,
        lsn: Lsn,
        commit_lsn: Lsn,
        timestamp: String,
    },
    Keepalive {
        lsn: Lsn,
        timestamp: String,
    },
    SwitchWal {
        lsn: Lsn,
    },
    /// MESSAGE / FILTERED comments: nothing to do.
    Comment,
    Statement(String),
}

/// Parse one replay line.
pub fn parse_apply_line(line: &str) -> Result<ApplyInstruction, ApplyError> {
    let bad = |what: &'static str| ApplyError::BadLine {
        line: line.to_string(),
        what,
    };

    let Some(comment) = line.strip_prefix("-- ") else {
        return Ok(ApplyInstruction::Statement(line.to_string()));
    };

    let field = |body: &str, key: &str| -> Option<String> {
        body.split_whitespace()
            .find_map(|token| token.strip_prefix(&format!("{key}=")).map(str::to_string))
    };
    let lsn_field = |body: &str, key: &str| -> Result<Lsn, ApplyError> {
        field(body, key)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| bad("missing LSN"))
    };
    // Timestamps contain spaces; everything after "ts=" belongs to them.
    let ts_field = |body: &str| -> String {
        body.split_once("ts=")
            .map(|(_, ts)| ts.to_string())
            .unwrap_or_default()
    };

    if let Some(body) = comment.strip_prefix("BEGIN ") {
        let commit_lsn = match field(body, "commitLsn").as_deref() {
            Some("?") | None => None,
            Some(text) => Some(text.parse().map_err(|_| bad("bad commitLsn"))?),
        };
        return Ok(ApplyInstruction::Begin {
            xid: field(body, "xid")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad("missing xid"))?,
            lsn: lsn_field(body, "lsn")?,
            commit_lsn,
        });
    }
    if let Some(body) = comment.strip_prefix("COMMIT ") {
        return Ok(ApplyInstruction::Commit {
            xid: field(body, "xid")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad("missing xid"))?,
            lsn: lsn_field(body, "lsn")?,
            commit_lsn: lsn_field(body, "commitLsn")?,
            timestamp: ts_field(body),
        });
    }
    if let Some(body) = comment.strip_prefix("KEEPALIVE ") {
        return Ok(ApplyInstruction::Keepalive {
            lsn: lsn_field(body, "lsn")?,
            timestamp: ts_field(body),
        });
    }
    if let Some(body) = comment.strip_prefix("SWITCH WAL ") {
        return Ok(ApplyInstruction::SwitchWal {
            lsn: lsn_field(body, "lsn")?,
        });
    }
    if comment.starts_with("MESSAGE") || comment.starts_with("FILTERED") {
        return Ok(ApplyInstruction::Comment);
    }
    Err(bad("unknown comment"))
}

/// Why an apply pass returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// File exhausted; wait for more data or the next file.
    EndOfFile,
    /// A switch marker named the next segment.
    SwitchTo(Lsn),
    /// Replay reached the stop position; exit cleanly.
    ReachedEndpos,
}

#[derive(Debug, Clone)]
pub struct ApplyConfig {
    pub origin: String,
    pub endpos: Option<Lsn>,
}

/// The apply state machine over an injected executor.
pub struct ApplyStage<E: SqlExecutor> {
    executor: E,
    endpos: Option<Lsn>,
    replay_lsn: Lsn,
    in_txn: bool,
    /// True while skipping a transaction already replayed (or past
    /// endpos) without executing it.
    skipping: bool,
    /// True when the open transaction executed without a known commit
    /// LSN; the decision then happens at COMMIT via rollback.
    deciding_at_commit: bool,
    commits: u64,
}

impl<E: SqlExecutor> ApplyStage<E> {
    /// Attach the session to its origin and recover the replay position.
    pub async fn start(config: ApplyConfig, mut executor: E) -> Result<Self, ApplyError> {
        let origin = OriginTracker::new(config.origin);
        origin.session_setup(&mut executor).await?;
        let replay_lsn = origin.progress(&mut executor).await?.unwrap_or(Lsn::ZERO);
        info!(replay_lsn = %replay_lsn, "apply starting");
        Ok(ApplyStage {
            executor,
            endpos: config.endpos,
            replay_lsn,
            in_txn: false,
            skipping: false,
            deciding_at_commit: false,
            commits: 0,
        })
    }

    pub fn replay_lsn(&self) -> Lsn {
        self.replay_lsn
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn set_endpos(&mut self, endpos: Option<Lsn>) {
        self.endpos = endpos;
    }

    pub fn reached_endpos(&self) -> bool {
        matches!(self.endpos, Some(endpos) if self.replay_lsn >= endpos)
    }

    /// Apply every line of one replay file. `on_commit` observes each new
    /// replay position (sentinel updates).
    pub async fn apply_file(
        &mut self,
        path: &Path,
        mut on_commit: impl FnMut(Lsn),
    ) -> Result<ApplyOutcome, ApplyError> {
        let file = std::fs::File::open(path).map_err(|e| ApplyError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!(file = %path.display(), "applying replay file");

        let mut first = true;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| ApplyError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            // Every file opens with its own switch marker; only switches
            // found later point at the next file.
            if first && matches!(parse_apply_line(&line)?, ApplyInstruction::SwitchWal { .. }) {
                first = false;
                continue;
            }
            first = false;
            match self.apply_line(&line, &mut on_commit).await? {
                None => {}
                Some(outcome) => return Ok(outcome),
            }
        }
        Ok(ApplyOutcome::EndOfFile)
    }

    /// Apply one line; `Some(outcome)` ends the pass.
    pub async fn apply_line(
        &mut self,
        line: &str,
        on_commit: &mut impl FnMut(Lsn),
    ) -> Result<Option<ApplyOutcome>, ApplyError> {
        match parse_apply_line(line)? {
            ApplyInstruction::Begin { commit_lsn, xid, .. } => {
                match commit_lsn {
                    Some(commit_lsn) if commit_lsn <= self.replay_lsn => {
                        debug!(xid, commit_lsn = %commit_lsn, "skipping replayed transaction");
                        self.in_txn = true;
                        self.skipping = true;
                    }
                    Some(commit_lsn)
                        if matches!(self.endpos, Some(endpos) if commit_lsn > endpos) =>
                    {
                        // Committing past endpos: nothing further applies.
                        return Ok(Some(ApplyOutcome::ReachedEndpos));
                    }
                    Some(_) => {
                        self.executor.batch("BEGIN").await?;
                        self.in_txn = true;
                        self.skipping = false;
                        self.deciding_at_commit = false;
                    }
                    None => {
                        // Commit position unknown (transaction spans
                        // segments): execute and decide at COMMIT.
                        self.executor.batch("BEGIN").await?;
                        self.in_txn = true;
                        self.skipping = false;
                        self.deciding_at_commit = true;
                    }
                }
                Ok(None)
            }

            ApplyInstruction::Statement(sql) => {
                if self.in_txn && self.skipping {
                    return Ok(None);
                }
                self.executor.batch(&sql).await?;
                Ok(None)
            }

            ApplyInstruction::Commit {
                commit_lsn,
                timestamp,
                xid,
                ..
            } => {
                if self.skipping {
                    self.in_txn = false;
                    self.skipping = false;
                    return Ok(None);
                }
                if self.deciding_at_commit && commit_lsn <= self.replay_lsn {
                    self.executor.batch("ROLLBACK").await?;
                    self.in_txn = false;
                    self.deciding_at_commit = false;
                    debug!(xid, commit_lsn = %commit_lsn, "rolled back replayed transaction");
                    return Ok(None);
                }
                if matches!(self.endpos, Some(endpos) if commit_lsn > endpos) {
                    self.executor.batch("ROLLBACK").await?;
                    self.in_txn = false;
                    return Ok(Some(ApplyOutcome::ReachedEndpos));
                }

                self.executor
                    .batch(&xact_setup_sql(commit_lsn, &timestamp))
                    .await?;
                self.executor.batch("COMMIT").await?;
                self.in_txn = false;
                self.deciding_at_commit = false;
                self.replay_lsn = commit_lsn;
                self.commits += 1;
                on_commit(commit_lsn);

                if self.reached_endpos() {
                    info!(replay_lsn = %self.replay_lsn, "reached endpos");
                    return Ok(Some(ApplyOutcome::ReachedEndpos));
                }
                Ok(None)
            }

            ApplyInstruction::Keepalive { lsn, timestamp } => {
                if self.in_txn || lsn <= self.replay_lsn {
                    return Ok(None);
                }
                // An empty transaction advances the origin without
                // applying anything.
                self.executor.batch("BEGIN").await?;
                self.executor
                    .batch(&xact_setup_sql(lsn, &timestamp))
                    .await?;
                self.executor.batch("COMMIT").await?;
                self.replay_lsn = lsn;
                on_commit(lsn);
                if self.reached_endpos() {
                    return Ok(Some(ApplyOutcome::ReachedEndpos));
                }
                Ok(None)
            }

            ApplyInstruction::SwitchWal { lsn } => {
                if self.in_txn {
                    // The transaction continues in the next file; the
                    // caller keeps our state and opens it.
                    warn!(lsn = %lsn, "transaction spans a segment boundary");
                }
                Ok(Some(ApplyOutcome::SwitchTo(lsn)))
            }

            ApplyInstruction::Comment => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;
