// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The clone orchestrator: composes the snapshot, the schema pipeline,
//! and the worker pools into the full phase-ordered clone. Every phase is
//! gated by a done marker, so a restarted run picks up where the previous
//! one stopped.

use crate::error::CloneError;
use crate::indexes::{index_worker, IndexMsg, IndexPool};
use crate::queue::WorkQueue;
use crate::supervisor::{ShutdownReason, StopFlag, Supervisor};
use crate::tables::{
    build_copy_plan, copy_worker, enqueue_table_followup, CompletionTracker, TableWorkerContext,
};
use crate::vacuum::{vacuum_worker, VacuumMsg, VacuumPool};
use parking_lot::Mutex;
use pgferry_core::{CloneOptions, FilterSpec, FollowOptions, Oid};
use pgferry_pgsql::{
    fetch_schema, PgExecutor, PgError, SentinelStore, Session, SnapshotManager,
};
use pgferry_schema::SchemaPipeline;
use pgferry_store::catalog_store::SchemaSnapshot;
use pgferry_store::{CatalogStore, Paths, RunStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything the run needs, constructed once by the entry point and
/// passed down explicitly.
pub struct Runtime {
    pub paths: Paths,
    pub run_store: Arc<dyn RunStore>,
    pub catalog: Arc<CatalogStore>,
    pub options: CloneOptions,
    pub filter_spec: FilterSpec,
    pub source_conninfo: String,
    pub target_conninfo: String,
}

impl Runtime {
    fn schema_pipeline(&self) -> SchemaPipeline {
        SchemaPipeline {
            paths: self.paths.clone(),
            run_store: Arc::clone(&self.run_store),
            catalog: Arc::clone(&self.catalog),
            source_conninfo: self.source_conninfo.clone(),
            target_conninfo: self.target_conninfo.clone(),
            skip_extension_comments: self.options.skip_extension_comments,
        }
    }
}

/// Runs the clone phases in order.
pub struct CloneOrchestrator {
    pub runtime: Runtime,
    pub supervisor: Supervisor,
    snapshot: SnapshotManager,
}

impl CloneOrchestrator {
    pub fn new(runtime: Runtime) -> Self {
        CloneOrchestrator {
            runtime,
            supervisor: Supervisor::new(),
            snapshot: SnapshotManager::new(),
        }
    }

    /// The full clone. With `follow` options the change slot is created
    /// from the same consistent point and the sentinel apply flag is
    /// flipped at the end.
    pub async fn run(&mut self, follow: Option<&FollowOptions>) -> Result<(), CloneError> {
        // Phase 0: establish the top-level snapshot.
        self.prepare_snapshot(follow).await?;

        let pipeline = self.runtime.schema_pipeline();

        // Phase 1: roles (optional).
        if self.runtime.options.with_roles {
            pipeline.copy_roles().await?;
        }

        // Phase 2: pre-data dump.
        pipeline
            .dump_source_schema(self.snapshot.identifier(), "pre-data")
            .await?;
        pipeline
            .dump_source_schema(self.snapshot.identifier(), "post-data")
            .await?;

        // Phase 3: catalog fetch + filter, or reload on resume.
        self.ensure_running()?;
        self.fetch_or_load_catalog().await?;

        // Phase 4: pre-data restore.
        let target = self.connect_target().await?;
        pipeline
            .target_prepare_schema(&target, self.runtime.options.drop_if_exists)
            .await?;
        drop(target);

        // Phase 5: table data, with the index and vacuum pools consuming
        // their queues concurrently.
        self.ensure_running()?;
        self.copy_all_table_data().await?;
        self.ensure_running()?;

        // Phase 6: the top-level snapshot is no longer needed.
        self.snapshot.close().await?;

        // Phase 7: post-data restore, minus what the index pool built.
        self.ensure_running()?;
        let target = self.connect_target().await?;
        pipeline.target_finalize_schema(&target).await?;
        drop(target);

        // Phase 8: in follow mode, allow apply to start catching up.
        if follow.is_some() {
            let source = self.connect_source().await?;
            SentinelStore::enable_apply(&source).await?;
        }

        // Sequence values are not carried by the copy.
        self.reset_sequences().await?;

        info!("clone complete");
        Ok(())
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.supervisor.stop_flag()
    }

    fn ensure_running(&self) -> Result<(), CloneError> {
        if self.supervisor.stop_flag().is_stopped() {
            return Err(CloneError::Stopped);
        }
        Ok(())
    }

    async fn connect_source(&self) -> Result<Session, CloneError> {
        Session::connect(&self.runtime.source_conninfo)
            .await
            .map_err(CloneError::Source)
    }

    async fn connect_target(&self) -> Result<Session, CloneError> {
        Session::connect(&self.runtime.target_conninfo)
            .await
            .map_err(CloneError::Target)
    }

    async fn prepare_snapshot(
        &mut self,
        follow: Option<&FollowOptions>,
    ) -> Result<(), CloneError> {
        if self.runtime.options.not_consistent {
            self.snapshot.skip();
            return Ok(());
        }
        // A snapshot exported by a still-running holder process takes
        // precedence.
        if let Some(identifier) =
            pgferry_store::files::read_text(&self.runtime.paths.snapshot_file())
                .map_err(|e| CloneError::Internal(e.to_string()))?
        {
            self.snapshot.adopt(identifier);
            return Ok(());
        }
        // Resuming consistently is only possible while the exporting
        // transaction is still open somewhere.
        if self.runtime.options.resume {
            return Err(CloneError::ResumeNeedsSnapshot);
        }

        let owner = self.connect_source().await?;
        match follow {
            Some(follow_opts) => {
                let startpos = self
                    .snapshot
                    .export_with_slot(owner, &follow_opts.slot_name, &follow_opts.plugin)
                    .await?;
                let source = self.connect_source().await?;
                SentinelStore::init(&source, startpos, follow_opts.endpos).await?;
            }
            None => {
                self.snapshot.export(owner).await?;
            }
        }
        if let Some(identifier) = self.snapshot.identifier() {
            pgferry_store::files::atomic_write_text(
                &self.runtime.paths.snapshot_file(),
                &format!("{identifier}\n"),
            )
            .map_err(|e| CloneError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn fetch_or_load_catalog(&mut self) -> Result<(), CloneError> {
        let schema_json = self.runtime.paths.schema_json();
        if self.runtime.options.resume && schema_json.exists() {
            self.runtime
                .catalog
                .load(&schema_json, &self.runtime.filter_spec)?;
            info!("reloaded catalog from schema.json");
            return Ok(());
        }

        let source = self.connect_source().await?;
        self.snapshot.import_into(&source).await?;
        let fetched = fetch_schema(
            &source,
            &self.runtime.filter_spec,
            self.runtime.options.split_tables_larger_than,
        )
        .await
        .map_err(CloneError::Source)?;
        source
            .client
            .simple_query("COMMIT")
            .await
            .map_err(|e| CloneError::Source(PgError::from(e)))?;

        self.runtime.catalog.populate(SchemaSnapshot {
            snapshot_id: self.snapshot.identifier().map(str::to_string),
            schemas: fetched.schemas,
            extensions: fetched.extensions,
            database_settings: fetched.database_settings,
            tables: fetched.tables,
            indexes: fetched.indexes,
            sequences: fetched.sequences,
            filter: fetched.filter,
            filter_fingerprint: CatalogStore::filter_fingerprint(&self.runtime.filter_spec),
            ..SchemaSnapshot::default()
        })?;
        self.runtime.catalog.persist(&schema_json)?;
        Ok(())
    }

    /// Phase 5: the three pools running concurrently over the snapshot.
    async fn copy_all_table_data(&mut self) -> Result<(), CloneError> {
        let options = &self.runtime.options;
        let tables = self.runtime.catalog.tables();
        let plan = Arc::new(Mutex::new(build_copy_plan(&tables)));
        let completion = Arc::new(CompletionTracker::new(
            &tables,
            self.runtime.run_store.as_ref(),
        ));

        let index_queue: WorkQueue<IndexMsg> = WorkQueue::bounded(1024);
        let vacuum_queue: WorkQueue<VacuumMsg> = WorkQueue::bounded(1024);
        let stop = self.supervisor.stop_flag();

        let catalog = Arc::clone(&self.runtime.catalog);
        let indexes_of: Arc<dyn Fn(Oid) -> Vec<Oid> + Send + Sync> = Arc::new(move |oid| {
            catalog.indexes_of(oid).iter().map(|i| i.oid).collect()
        });

        let index_pool = IndexPool::new(
            index_queue.clone(),
            vacuum_queue.clone(),
            Arc::clone(&self.runtime.run_store),
            Arc::clone(&self.runtime.catalog),
            options.resume,
            options.skip_vacuum,
            options.fail_fast,
        );
        let vacuum_pool = Arc::new(VacuumPool {
            queue: vacuum_queue.clone(),
            run_store: Arc::clone(&self.runtime.run_store),
            catalog: Arc::clone(&self.runtime.catalog),
            fail_fast: options.fail_fast,
        });

        let mut index_workers = Vec::new();
        for worker in 0..options.index_jobs {
            let executor = PgExecutor::new(self.connect_target().await?);
            index_workers.push(tokio::spawn(index_worker(
                Arc::clone(&index_pool),
                worker,
                executor,
                stop.clone(),
            )));
        }
        let mut vacuum_workers = Vec::new();
        for worker in 0..options.vacuum_jobs {
            let executor = PgExecutor::new(self.connect_target().await?);
            vacuum_workers.push(tokio::spawn(vacuum_worker(
                Arc::clone(&vacuum_pool),
                worker,
                executor,
                stop.clone(),
            )));
        }

        // Tables already fully copied on disk (resume) still owe their
        // index builds; the pools are consuming by now.
        for oid in completion.initially_complete() {
            if let Some(table) = self.runtime.catalog.table_by_oid(oid) {
                enqueue_table_followup(
                    &index_queue,
                    &vacuum_queue,
                    indexes_of.as_ref(),
                    &table,
                    options.skip_vacuum,
                )
                .await;
            }
        }

        let mut table_workers = Vec::new();
        for worker in 0..options.table_jobs {
            let ctx = TableWorkerContext {
                worker,
                source_conninfo: self.runtime.source_conninfo.clone(),
                target_conninfo: self.runtime.target_conninfo.clone(),
                snapshot_id: self.snapshot.identifier().map(str::to_string),
                run_store: Arc::clone(&self.runtime.run_store),
                plan: Arc::clone(&plan),
                completion: Arc::clone(&completion),
                index_queue: index_queue.clone(),
                vacuum_queue: vacuum_queue.clone(),
                indexes_of: Arc::clone(&indexes_of),
                skip_vacuum: options.skip_vacuum,
                fail_fast: options.fail_fast,
                stop: stop.clone(),
            };
            table_workers.push(tokio::spawn(copy_worker(ctx)));
        }

        let mut failures = self.join_pool("table", table_workers).await;
        // Tables are done: once the queued index builds drain, workers can
        // stop; the index pool stops the vacuum pool the same way.
        index_pool.send_stop(options.index_jobs).await;
        failures.extend(self.join_pool("index", index_workers).await);
        vacuum_pool.send_stop(options.vacuum_jobs).await;
        failures.extend(self.join_pool("vacuum", vacuum_workers).await);

        if !failures.is_empty() {
            if options.fail_fast {
                self.supervisor.shutdown(ShutdownReason::FailFast);
            }
            let (_, first) = failures.remove(0);
            return Err(first);
        }
        Ok(())
    }

    async fn join_pool(
        &self,
        pool: &str,
        handles: Vec<JoinHandle<Result<(), CloneError>>>,
    ) -> Vec<(String, CloneError)> {
        let mut failures = Vec::new();
        for (worker, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(pool, worker, error = %e, "pool worker failed");
                    if self.runtime.options.fail_fast {
                        self.supervisor.shutdown(ShutdownReason::FailFast);
                    }
                    failures.push((format!("{pool}-{worker}"), e));
                }
                Err(join_err) => {
                    failures.push((
                        format!("{pool}-{worker}"),
                        CloneError::Internal(join_err.to_string()),
                    ));
                }
            }
        }
        failures
    }

    /// Re-sync sequence current values (bulk copy does not carry them).
    pub async fn reset_sequences(&self) -> Result<(), CloneError> {
        let sequences = self.runtime.catalog.sequences();
        if sequences.is_empty() {
            return Ok(());
        }
        let target = self.connect_target().await?;
        pgferry_pgsql::reset_sequences(&target, &sequences)
            .await
            .map_err(CloneError::Target)?;
        Ok(())
    }
}
