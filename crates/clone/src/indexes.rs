// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The index/constraint worker pool.
//!
//! Workers block on the shared index queue. Each index is built once,
//! guarded by the progress markers; when the last index of a table lands,
//! the same worker promotes the table's constraints; constraints never
//! run before every index of their table is done. Indexes that exist only
//! to back a non-unique, non-primary constraint are not created at all:
//! the constraint DDL creates them.

use crate::error::CloneError;
use crate::queue::WorkQueue;
use crate::supervisor::StopFlag;
use crate::vacuum::VacuumMsg;
use parking_lot::Mutex;
use pgferry_core::sqltext::quote_literal;
use pgferry_core::{IndexConstraint, Oid, SourceIndex};
use pgferry_pgsql::{ExecError, SqlExecutor};
use pgferry_store::{CatalogStore, Claim, RunStore, WorkUnit};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Messages on the index queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMsg {
    Build(Oid),
    Stop,
}

/// The creation command for an index, with the `IF NOT EXISTS` variant
/// applied on resume and in the standalone copy-indexes command.
pub fn index_create_sql(index: &SourceIndex, if_not_exists: bool) -> String {
    if !if_not_exists {
        return index.definition.clone();
    }
    for prefix in ["CREATE UNIQUE INDEX ", "CREATE INDEX "] {
        if let Some(rest) = index.definition.strip_prefix(prefix) {
            if rest.starts_with("IF NOT EXISTS ") {
                break;
            }
            return format!("{prefix}IF NOT EXISTS {rest}");
        }
    }
    index.definition.clone()
}

/// The promotion command for a constraint backed by an index.
pub fn constraint_create_sql(
    table_qname: &str,
    index: &SourceIndex,
    constraint: &IndexConstraint,
) -> String {
    let name = pgferry_core::sqltext::quote_ident(&constraint.name);
    if constraint.is_primary {
        format!(
            "ALTER TABLE {table_qname} ADD CONSTRAINT {name} PRIMARY KEY USING INDEX {}",
            pgferry_core::sqltext::quote_ident(&index.relname)
        )
    } else if constraint.is_unique {
        format!(
            "ALTER TABLE {table_qname} ADD CONSTRAINT {name} UNIQUE USING INDEX {}",
            pgferry_core::sqltext::quote_ident(&index.relname)
        )
    } else {
        format!(
            "ALTER TABLE {table_qname} ADD CONSTRAINT {name} {}",
            constraint.definition
        )
    }
}

/// Shared pool state handed to each worker by the supervisor.
pub struct IndexPool {
    pub queue: WorkQueue<IndexMsg>,
    pub vacuum_queue: WorkQueue<VacuumMsg>,
    pub run_store: Arc<dyn RunStore>,
    pub catalog: Arc<CatalogStore>,
    /// Apply `IF NOT EXISTS` (resume / standalone copy-indexes).
    pub if_not_exists: bool,
    pub skip_vacuum: bool,
    pub fail_fast: bool,
    /// Tables whose constraint promotion is underway, so only one worker
    /// builds constraints for a table.
    constraint_guard: Arc<Mutex<HashSet<u32>>>,
}

impl IndexPool {
    pub fn new(
        queue: WorkQueue<IndexMsg>,
        vacuum_queue: WorkQueue<VacuumMsg>,
        run_store: Arc<dyn RunStore>,
        catalog: Arc<CatalogStore>,
        if_not_exists: bool,
        skip_vacuum: bool,
        fail_fast: bool,
    ) -> Arc<Self> {
        Arc::new(IndexPool {
            queue,
            vacuum_queue,
            run_store,
            catalog,
            if_not_exists,
            skip_vacuum,
            fail_fast,
            constraint_guard: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Post a stop message per worker.
    pub async fn send_stop(&self, workers: usize) {
        for _ in 0..workers {
            self.queue.send(IndexMsg::Stop).await;
        }
    }
}

/// Worker loop. `executor` is this worker's own target session.
pub async fn index_worker<E: SqlExecutor>(
    pool: Arc<IndexPool>,
    worker: usize,
    mut executor: E,
    stop: StopFlag,
) -> Result<(), CloneError> {
    let mut failed = 0usize;
    let mut total = 0usize;

    while let Some(message) = pool.queue.recv(&stop).await {
        let oid = match message {
            IndexMsg::Stop => break,
            IndexMsg::Build(oid) => oid,
        };
        total += 1;

        match build_one_index(&pool, worker, &mut executor, oid).await {
            Ok(()) => {}
            Err(e) => {
                failed += 1;
                warn!(worker, index = %oid, error = %e, "index build failed");
                if pool.fail_fast {
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

async fn build_one_index<E: SqlExecutor>(
    pool: &Arc<IndexPool>,
    worker: usize,
    executor: &mut E,
    oid: Oid,
) -> Result<(), CloneError> {
    let Some(index) = pool.catalog.index_by_oid(oid) else {
        warn!(index = %oid, "index missing from catalog, skipping");
        return Ok(());
    };
    let unit = WorkUnit::index(oid, &index.qname());

    if index.creation_deferred_to_constraint() {
        // The constraint DDL creates this index; record it done so the
        // constraint phase can start and post-data restore skips it.
        if !pool.run_store.is_done(&unit) {
            if let Claim::Acquired = pool.run_store.claim(&unit)? {
                pool.run_store.mark_done(&unit)?;
                info!(worker, index = %index.qname(), "deferring index to its constraint");
            }
        }
        return finish_table_if_ready(pool, worker, executor, &index).await;
    }

    match pool.run_store.claim(&unit)? {
        Claim::AlreadyDone => {
            return finish_table_if_ready(pool, worker, executor, &index).await;
        }
        Claim::Busy { holder } => {
            info!(worker, index = %index.qname(), holder, "index held elsewhere, skipping");
            return Ok(());
        }
        Claim::Acquired => {}
    }

    let sql = index_create_sql(&index, pool.if_not_exists);
    match executor.batch(&sql).await {
        Ok(()) => {
            pool.run_store.mark_done(&unit)?;
            info!(worker, index = %index.qname(), "built index");
        }
        Err(ExecError::AlreadyExists(detail)) => {
            // Pre-existing on the target: success, done marker written.
            pool.run_store.mark_done(&unit)?;
            info!(worker, index = %index.qname(), detail, "index already on target");
        }
        Err(ExecError::Pg(e)) => {
            pool.run_store.release(&unit)?;
            return Err(CloneError::Target(e));
        }
    }

    finish_table_if_ready(pool, worker, executor, &index).await
}

/// When every index of the owning table is done and nobody else is on it,
/// promote the table's constraints, then queue the vacuum.
async fn finish_table_if_ready<E: SqlExecutor>(
    pool: &Arc<IndexPool>,
    worker: usize,
    executor: &mut E,
    index: &SourceIndex,
) -> Result<(), CloneError> {
    let table_oid = index.table_oid;
    let indexes = pool.catalog.indexes_of(table_oid);
    let all_done = indexes
        .iter()
        .all(|i| pool.run_store.is_done(&WorkUnit::index(i.oid, &i.qname())));
    if !all_done {
        return Ok(());
    }

    // One worker per table builds constraints.
    if !pool.constraint_guard.lock().insert(table_oid.0) {
        return Ok(());
    }

    let table_qname = pool
        .catalog
        .table_by_oid(table_oid)
        .map(|t| t.qname())
        .unwrap_or_else(|| index.qname());

    let mut result = Ok(());
    for idx in &indexes {
        let Some(constraint) = &idx.constraint else {
            continue;
        };
        if let Err(e) =
            build_one_constraint(pool, worker, executor, &table_qname, idx, constraint).await
        {
            warn!(
                worker,
                constraint = %constraint.name,
                error = %e,
                "constraint build failed"
            );
            if pool.fail_fast {
                result = Err(e);
                break;
            }
        }
    }

    if result.is_ok() {
        let constraints_done = indexes
            .iter()
            .filter_map(|i| i.constraint.as_ref())
            .all(|c| {
                pool.run_store
                    .is_done(&WorkUnit::constraint(c.oid, &c.name))
            });
        if constraints_done && !pool.skip_vacuum {
            pool.vacuum_queue.send(VacuumMsg::Analyze(table_oid)).await;
        }
    }
    result
}

async fn build_one_constraint<E: SqlExecutor>(
    pool: &Arc<IndexPool>,
    worker: usize,
    executor: &mut E,
    table_qname: &str,
    index: &SourceIndex,
    constraint: &IndexConstraint,
) -> Result<(), CloneError> {
    let unit = WorkUnit::constraint(constraint.oid, &constraint.name);
    match pool.run_store.claim(&unit)? {
        Claim::AlreadyDone => return Ok(()),
        Claim::Busy { holder } => {
            info!(worker, constraint = %constraint.name, holder, "constraint held elsewhere");
            return Ok(());
        }
        Claim::Acquired => {}
    }

    // A same-named constraint already on the target counts as done.
    let present = executor
        .scalar(&format!(
            "SELECT 1 FROM pg_constraint WHERE conname = {} \
             AND conrelid = {}::regclass",
            quote_literal(&constraint.name),
            quote_literal(table_qname),
        ))
        .await
        .map_err(exec_to_clone)?;
    if present.is_some() {
        pool.run_store.mark_done(&unit)?;
        info!(worker, constraint = %constraint.name, "constraint already on target");
        return Ok(());
    }

    let sql = constraint_create_sql(table_qname, index, constraint);
    match executor.batch(&sql).await {
        Ok(()) => {
            pool.run_store.mark_done(&unit)?;
            info!(worker, constraint = %constraint.name, "added constraint");
            Ok(())
        }
        Err(ExecError::AlreadyExists(detail)) => {
            pool.run_store.mark_done(&unit)?;
            info!(worker, constraint = %constraint.name, detail, "constraint already on target");
            Ok(())
        }
        Err(ExecError::Pg(e)) => {
            pool.run_store.release(&unit)?;
            Err(CloneError::Target(e))
        }
    }
}

fn exec_to_clone(error: ExecError) -> CloneError {
    match error {
        ExecError::AlreadyExists(detail) => CloneError::Internal(detail),
        ExecError::Pg(e) => CloneError::Target(e),
    }
}

#[cfg(test)]
#[path = "indexes_tests.rs"]
mod tests;
