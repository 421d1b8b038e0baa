// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The vacuum worker pool: `VACUUM ANALYZE` on the target, one table at a
//! time, after that table's indexes and constraints are in place.

use crate::error::CloneError;
use crate::queue::WorkQueue;
use crate::supervisor::StopFlag;
use pgferry_core::Oid;
use pgferry_pgsql::{ExecError, SqlExecutor};
use pgferry_store::{CatalogStore, Claim, RunStore, WorkUnit};
use std::sync::Arc;
use tracing::{info, warn};

/// Messages on the vacuum queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VacuumMsg {
    Analyze(Oid),
    Stop,
}

/// Shared state for the vacuum workers.
pub struct VacuumPool {
    pub queue: WorkQueue<VacuumMsg>,
    pub run_store: Arc<dyn RunStore>,
    pub catalog: Arc<CatalogStore>,
    pub fail_fast: bool,
}

impl VacuumPool {
    pub async fn send_stop(&self, workers: usize) {
        for _ in 0..workers {
            self.queue.send(VacuumMsg::Stop).await;
        }
    }
}

/// Worker loop over the vacuum queue.
pub async fn vacuum_worker<E: SqlExecutor>(
    pool: Arc<VacuumPool>,
    worker: usize,
    mut executor: E,
    stop: StopFlag,
) -> Result<(), CloneError> {
    let mut failed = 0usize;
    let mut total = 0usize;

    while let Some(message) = pool.queue.recv(&stop).await {
        let oid = match message {
            VacuumMsg::Stop => break,
            VacuumMsg::Analyze(oid) => oid,
        };
        let Some(table) = pool.catalog.table_by_oid(oid) else {
            warn!(table = %oid, "table missing from catalog, skipping vacuum");
            continue;
        };
        total += 1;

        let unit = WorkUnit::vacuum(oid, &table.qname());
        match pool.run_store.claim(&unit)? {
            Claim::AlreadyDone | Claim::Busy { .. } => continue,
            Claim::Acquired => {}
        }

        match executor
            .batch(&format!("VACUUM ANALYZE {}", table.qname()))
            .await
        {
            Ok(()) => {
                pool.run_store.mark_done(&unit)?;
                info!(worker, table = %table.qname(), "vacuum analyze done");
            }
            Err(ExecError::AlreadyExists(_)) => {
                pool.run_store.mark_done(&unit)?;
            }
            Err(ExecError::Pg(e)) => {
                pool.run_store.release(&unit)?;
                failed += 1;
                warn!(worker, table = %table.qname(), error = %e, "vacuum failed");
                if pool.fail_fast {
                    return Err(CloneError::Target(e));
                }
            }
        }
    }

    if failed > 0 {
        return Err(CloneError::UnitsFailed { failed, total });
    }
    Ok(())
}

#[cfg(test)]
#[path = "vacuum_tests.rs"]
mod tests;
