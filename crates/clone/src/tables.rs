// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The table-data scheduler.
//!
//! Workers pull jobs from a shared plan (largest tables first, slices in
//! part order), claim each through the progress markers, stream the copy,
//! and hand completed tables to the index pool. A partitioned table's
//! target is truncated exactly once before any slice writes; whole-table
//! copies truncate inside the copy transaction instead, so a crash rolls
//! both back together.

use crate::error::CloneError;
use crate::indexes::IndexMsg;
use crate::queue::WorkQueue;
use crate::supervisor::StopFlag;
use crate::vacuum::VacuumMsg;
use parking_lot::Mutex;
use pgferry_core::{Oid, SourceTable, TablePart};
use pgferry_pgsql::{import_snapshot, stream_table_part, PgError, Session};
use pgferry_store::{Claim, RunStore, WorkUnit};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One claimable copy job.
#[derive(Debug, Clone)]
pub struct TableJob {
    pub table: SourceTable,
    pub part: TablePart,
}

impl TableJob {
    pub fn unit(&self) -> WorkUnit {
        WorkUnit::table_part(
            self.table.oid,
            self.part.part_number,
            self.part.part_count,
            &self.table.qname(),
        )
    }
}

/// Expand tables into jobs. Tables arrive sorted largest-first from the
/// catalog store; slices stay in part-number order but may run on any
/// worker.
pub fn build_copy_plan(tables: &[SourceTable]) -> VecDeque<TableJob> {
    let mut plan = VecDeque::new();
    for table in tables {
        for part in &table.parts {
            plan.push_back(TableJob {
                table: table.clone(),
                part: part.clone(),
            });
        }
    }
    plan
}

/// Tracks per-table part completion and emits each table exactly once.
pub struct CompletionTracker {
    remaining: Mutex<HashMap<u32, HashSet<u32>>>,
    emitted: Mutex<HashSet<u32>>,
}

impl CompletionTracker {
    /// Seed from the plan, counting parts already done (resume) as
    /// complete.
    pub fn new(tables: &[SourceTable], run_store: &dyn RunStore) -> Self {
        let mut remaining: HashMap<u32, HashSet<u32>> = HashMap::new();
        for table in tables {
            let parts = remaining.entry(table.oid.0).or_default();
            for part in &table.parts {
                let unit = WorkUnit::table_part(
                    table.oid,
                    part.part_number,
                    part.part_count,
                    &table.qname(),
                );
                if !run_store.is_done(&unit) {
                    parts.insert(part.part_number);
                }
            }
        }
        CompletionTracker {
            remaining: Mutex::new(remaining),
            emitted: Mutex::new(HashSet::new()),
        }
    }

    /// Tables already fully copied at startup (their index builds must be
    /// re-enqueued on resume). Marks them emitted, so workers finding
    /// their slices already done never enqueue a second time.
    pub fn initially_complete(&self) -> Vec<Oid> {
        let remaining = self.remaining.lock();
        let mut emitted = self.emitted.lock();
        remaining
            .iter()
            .filter(|(_, parts)| parts.is_empty())
            .map(|(&oid, _)| {
                emitted.insert(oid);
                Oid(oid)
            })
            .collect()
    }

    /// Record one finished part. Returns true exactly once per table,
    /// when its last part completes.
    pub fn part_done(&self, table_oid: Oid, part_number: u32) -> bool {
        let mut remaining = self.remaining.lock();
        let Some(parts) = remaining.get_mut(&table_oid.0) else {
            return false;
        };
        parts.remove(&part_number);
        if !parts.is_empty() {
            return false;
        }
        drop(remaining);
        self.emitted.lock().insert(table_oid.0)
    }
}

/// Everything a copy worker needs, handed down by the supervisor.
pub struct TableWorkerContext {
    pub worker: usize,
    pub source_conninfo: String,
    pub target_conninfo: String,
    pub snapshot_id: Option<String>,
    pub run_store: Arc<dyn RunStore>,
    pub plan: Arc<Mutex<VecDeque<TableJob>>>,
    pub completion: Arc<CompletionTracker>,
    pub index_queue: WorkQueue<IndexMsg>,
    pub vacuum_queue: WorkQueue<VacuumMsg>,
    pub indexes_of: Arc<dyn Fn(Oid) -> Vec<Oid> + Send + Sync>,
    pub skip_vacuum: bool,
    pub fail_fast: bool,
    pub stop: StopFlag,
}

/// Worker loop: claim, copy, mark done, coordinate completion.
pub async fn copy_worker(ctx: TableWorkerContext) -> Result<(), CloneError> {
    let mut failed = 0usize;
    let mut total = 0usize;

    loop {
        if ctx.stop.is_stopped() {
            break;
        }
        let Some(job) = ctx.plan.lock().pop_front() else {
            break;
        };
        total += 1;

        let unit = job.unit();
        match ctx.run_store.claim(&unit)? {
            Claim::AlreadyDone => {
                note_part_done(&ctx, &job).await;
                continue;
            }
            Claim::Busy { holder } => {
                info!(unit = %unit.key, holder, "slice claimed elsewhere, skipping");
                continue;
            }
            Claim::Acquired => {}
        }

        match copy_one_part(&ctx, &job).await {
            Ok(rows) => {
                ctx.run_store.mark_done(&unit)?;
                info!(
                    worker = ctx.worker,
                    table = %job.table.qname(),
                    part = job.part.part_number,
                    of = job.part.part_count,
                    rows,
                    "copied table slice"
                );
                note_part_done(&ctx, &job).await;
            }
            Err(e) => {
                ctx.run_store.release(&unit)?;
                failed += 1;
                warn!(
                    worker = ctx.worker,
                    table = %job.table.qname(),
                    part = job.part.part_number,
                    error = %e,
                    "table slice copy failed"
                );
                if ctx.fail_fast {
                    return Err(e);
                }
            }
        }
    }

    if failed > 0 {
        return Err(CloneError::UnitsFailed { failed, total });
    }
    Ok(())
}

/// Copy one slice: import the snapshot on a fresh source session, make
/// sure the target is truncated per the table's protocol, stream, commit.
async fn copy_one_part(ctx: &TableWorkerContext, job: &TableJob) -> Result<u64, CloneError> {
    let source = Session::connect(&ctx.source_conninfo)
        .await
        .map_err(CloneError::Source)?;
    import_snapshot(&source, ctx.snapshot_id.as_deref()).await?;

    let target = Session::connect(&ctx.target_conninfo)
        .await
        .map_err(CloneError::Target)?;

    if job.part.is_whole() {
        // Truncate and copy in one target transaction.
        target
            .client
            .batch_execute(&format!(
                "BEGIN;\nTRUNCATE ONLY {}",
                job.table.qname()
            ))
            .await
            .map_err(|e| CloneError::Target(PgError::from(e)))?;
        let rows = stream_table_part(&source, &target, &job.table, &job.part)
            .await
            .map_err(CloneError::Target)?;
        target
            .client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| CloneError::Target(PgError::from(e)))?;
        finish_source(&source).await?;
        return Ok(rows);
    }

    ensure_truncated_once(ctx, job, &target).await?;
    let rows = stream_table_part(&source, &target, &job.table, &job.part)
        .await
        .map_err(CloneError::Target)?;
    finish_source(&source).await?;
    Ok(rows)
}

async fn finish_source(source: &Session) -> Result<(), CloneError> {
    source
        .client
        .simple_query("COMMIT")
        .await
        .map_err(|e| CloneError::Source(PgError::from(e)))?;
    Ok(())
}

/// The cross-worker truncate protocol for partitioned tables: the first
/// slice to claim the truncate unit runs it; everyone else waits for the
/// done marker before writing.
async fn ensure_truncated_once(
    ctx: &TableWorkerContext,
    job: &TableJob,
    target: &Session,
) -> Result<(), CloneError> {
    let unit = WorkUnit::truncate(job.table.oid, &job.table.qname());
    match ctx.run_store.claim(&unit)? {
        Claim::AlreadyDone => return Ok(()),
        Claim::Acquired => {
            target
                .client
                .batch_execute(&format!("TRUNCATE ONLY {}", job.table.qname()))
                .await
                .map_err(|e| CloneError::Target(PgError::from(e)))?;
            ctx.run_store.mark_done(&unit)?;
            info!(table = %job.table.qname(), "truncated target table");
            Ok(())
        }
        Claim::Busy { .. } => {
            // Another slice is truncating right now; wait for the marker.
            while !ctx.run_store.is_done(&unit) {
                if ctx.stop.is_stopped() {
                    return Err(CloneError::Stopped);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(())
        }
    }
}

/// Completion bookkeeping shared by fresh copies and already-done slices.
async fn note_part_done(ctx: &TableWorkerContext, job: &TableJob) {
    if !ctx.completion.part_done(job.table.oid, job.part.part_number) {
        return;
    }
    enqueue_table_followup(
        &ctx.index_queue,
        &ctx.vacuum_queue,
        ctx.indexes_of.as_ref(),
        &job.table,
        ctx.skip_vacuum,
    )
    .await;
}

/// When a table's last slice lands: hand its indexes to the index pool,
/// or go straight to vacuum when it has none.
pub async fn enqueue_table_followup(
    index_queue: &WorkQueue<IndexMsg>,
    vacuum_queue: &WorkQueue<VacuumMsg>,
    indexes_of: &(dyn Fn(Oid) -> Vec<Oid> + Send + Sync),
    table: &SourceTable,
    skip_vacuum: bool,
) {
    let indexes = indexes_of(table.oid);
    if indexes.is_empty() {
        if !skip_vacuum {
            vacuum_queue.send(VacuumMsg::Analyze(table.oid)).await;
        }
        return;
    }
    info!(
        table = %table.qname(),
        indexes = indexes.len(),
        "table copied, enqueueing index builds"
    );
    for oid in indexes {
        index_queue.send(IndexMsg::Build(oid)).await;
    }
}

#[cfg(test)]
#[path = "tables_tests.rs"]
mod tests;
