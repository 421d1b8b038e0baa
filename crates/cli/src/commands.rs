// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatch: builds the Runtime context once and hands it to the
//! clone orchestrator and/or the follow runner.

use crate::args::{CdcArgs, Cli, CloneArgs, Command, ConnArgs, FollowMode, SentinelAction};
use anyhow::{Context, Result};
use pgferry_cdc::{FollowOutcome, FollowRunner};
use pgferry_clone::{CloneError, CloneOrchestrator, Runtime, ShutdownReason};
use pgferry_core::{CdcMode, CloneOptions, ExitCode, FilterSpec, FollowOptions, Lsn};
use pgferry_pgsql::{SentinelStore, Session, SnapshotManager};
use pgferry_store::{CatalogStore, FsRunStore, WorkDir};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Map a failed command onto the exit-code contract.
pub fn classify(error: &anyhow::Error) -> ExitCode {
    if let Some(clone_error) = error.downcast_ref::<CloneError>() {
        return clone_error.exit_code();
    }
    if let Some(follow_error) = error.downcast_ref::<pgferry_cdc::FollowError>() {
        return match follow_error {
            pgferry_cdc::FollowError::Apply(_) => ExitCode::Target,
            pgferry_cdc::FollowError::Setup(pgferry_cdc::SetupError::Target(_)) => {
                ExitCode::Target
            }
            _ => ExitCode::Source,
        };
    }
    if error.downcast_ref::<pgferry_store::WorkDirError>().is_some() {
        return ExitCode::Config;
    }
    ExitCode::Internal
}

pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Clone(args) => clone(args).await,
        Command::Follow {
            conn,
            cdc,
            mode,
            resume,
        } => follow(conn, cdc, mode, resume).await,
        Command::Snapshot { conn } => snapshot(conn).await,
        Command::CopyIndexes { conn, index_jobs } => copy_indexes(conn, index_jobs).await,
        Command::Inspect { dir } => inspect(dir),
        Command::Sentinel { conn, action } => sentinel(conn, action).await,
    }
}

fn load_filters(path: Option<&PathBuf>) -> Result<FilterSpec> {
    match path {
        None => Ok(FilterSpec::default()),
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading filter file {}", path.display()))?;
            let spec: FilterSpec = serde_json::from_str(&data)
                .with_context(|| format!("parsing filter file {}", path.display()))?;
            Ok(spec)
        }
    }
}

fn follow_options(cdc: &CdcArgs) -> Result<FollowOptions> {
    let endpos = match &cdc.endpos {
        None => None,
        Some(text) => Some(
            text.parse::<Lsn>()
                .map_err(|e| anyhow::anyhow!("invalid --endpos: {e}"))?,
        ),
    };
    Ok(FollowOptions {
        mode: CdcMode::Catchup,
        slot_name: cdc.slot_name.clone(),
        origin_name: cdc.origin.clone(),
        plugin: cdc.plugin.clone(),
        endpos,
    })
}

/// Trip the given stop signal on SIGTERM/SIGINT.
fn spawn_signal_watcher(stop_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("interrupt received, shutting down"),
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        }
        let _ = stop_tx.send(true);
    });
}

async fn clone(args: CloneArgs) -> Result<ExitCode> {
    let mut workdir = WorkDir::init(args.conn.dir.clone(), args.restart, args.resume)?;
    workdir.acquire_pid_file()?;

    let filter_spec = load_filters(args.filters.as_ref())?;
    let options = CloneOptions {
        table_jobs: args.table_jobs.max(1),
        index_jobs: args.index_jobs.max(1),
        vacuum_jobs: args.vacuum_jobs.max(1),
        split_tables_larger_than: args.split_tables_larger_than,
        drop_if_exists: args.drop_if_exists,
        fail_fast: args.fail_fast,
        skip_vacuum: args.skip_vacuum,
        skip_extension_comments: true,
        with_roles: args.roles,
        resume: args.resume,
        restart: args.restart,
        not_consistent: args.not_consistent,
        follow: args.follow,
    };
    let follow_opts = args.follow.then(|| follow_options(&args.cdc)).transpose()?;

    let paths = workdir.paths.clone();
    let runtime = Runtime {
        paths: paths.clone(),
        run_store: Arc::new(FsRunStore::new(paths.run_dir())),
        catalog: Arc::new(CatalogStore::new()),
        options,
        filter_spec,
        source_conninfo: args.conn.source.clone(),
        target_conninfo: args.conn.target.clone(),
    };
    let catalog = Arc::clone(&runtime.catalog);
    let mut orchestrator = CloneOrchestrator::new(runtime);
    // Released in reverse registration order on every exit path.
    let pid_path = paths.pid_file();
    orchestrator.supervisor.register_resource(
        "pid-file",
        Box::new(move || {
            let _ = std::fs::remove_file(&pid_path);
        }),
    );

    // One stop signal for everything: the supervisor's flag for clone
    // workers, a watch channel for the follow pipeline.
    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_signal_watcher(stop_tx.clone());
    let shutdown = orchestrator.supervisor.shutdown_handle();
    {
        let mut rx = stop_rx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if rx.changed().await.is_ok() && *rx.borrow() {
                shutdown.shutdown(ShutdownReason::Signal);
            }
        });
    }

    // In follow mode the receive side runs alongside the clone so the
    // source can release WAL as it goes; apply stays gated on the
    // sentinel flag the clone flips at the end.
    let follow_task = match &follow_opts {
        Some(opts) => {
            let runner = FollowRunner {
                paths: paths.clone(),
                catalog,
                source_conninfo: args.conn.source.clone(),
                target_conninfo: args.conn.target.clone(),
                options: opts.clone(),
                stop: stop_rx.clone(),
            };
            Some(tokio::spawn(async move { runner.run(CdcMode::Catchup).await }))
        }
        None => None,
    };

    if let Err(e) = orchestrator.run(follow_opts.as_ref()).await {
        shutdown.shutdown(ShutdownReason::FailFast);
        let _ = stop_tx.send(true);
        if let Some(task) = follow_task {
            let _ = task.await;
        }
        return Err(e.into());
    }

    if let Some(task) = follow_task {
        let outcome = task
            .await
            .map_err(|e| anyhow::anyhow!("follow task panicked: {e}"))??;
        workdir.cleanup();
        return Ok(match outcome {
            FollowOutcome::ReachedEndpos | FollowOutcome::Stopped => ExitCode::Quit,
        });
    }

    workdir.cleanup();
    Ok(ExitCode::Success)
}

async fn follow(
    conn: ConnArgs,
    cdc: CdcArgs,
    mode: FollowMode,
    resume: bool,
) -> Result<ExitCode> {
    let mut workdir = WorkDir::init(conn.dir.clone(), false, resume)?;
    workdir.acquire_service_pid_file("follow")?;

    let options = follow_options(&cdc)?;
    let mode = match mode {
        FollowMode::Receive => CdcMode::Receive,
        FollowMode::Prefetch => CdcMode::Prefetch,
        FollowMode::Catchup => CdcMode::Catchup,
        FollowMode::Replay => CdcMode::Replay,
    };

    // The catalog gives transform its primary-key lookups; a missing
    // schema.json (receive-only setups) leaves it empty.
    let catalog = Arc::new(CatalogStore::new());
    let schema_json = workdir.paths.schema_json();
    if schema_json.exists() {
        catalog.load_unchecked(&schema_json)?;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_signal_watcher(stop_tx);

    let runner = FollowRunner {
        paths: workdir.paths.clone(),
        catalog,
        source_conninfo: conn.source,
        target_conninfo: conn.target,
        options,
        stop: stop_rx,
    };
    let outcome = runner.run(mode).await?;
    workdir.cleanup();
    Ok(match outcome {
        FollowOutcome::ReachedEndpos | FollowOutcome::Stopped => ExitCode::Quit,
    })
}

/// Export a snapshot and hold the transaction open until terminated, so
/// separate clone/follow processes can share one consistent point.
async fn snapshot(conn: ConnArgs) -> Result<ExitCode> {
    let mut workdir = WorkDir::init(conn.dir.clone(), false, false)
        .or_else(|_| WorkDir::init(conn.dir.clone(), false, true))?;
    workdir.acquire_service_pid_file("snapshot")?;

    let owner = Session::connect(&conn.source)
        .await
        .map_err(|e| anyhow::anyhow!("source: {e}"))?;
    let mut manager = SnapshotManager::new();
    let identifier = manager.export(owner).await?.to_string();
    pgferry_store::files::atomic_write_text(
        &workdir.paths.snapshot_file(),
        &format!("{identifier}\n"),
    )?;
    println!("{identifier}");

    let (stop_tx, mut stop_rx) = watch::channel(false);
    spawn_signal_watcher(stop_tx);
    while !*stop_rx.borrow() {
        if stop_rx.changed().await.is_err() {
            break;
        }
    }

    manager.close().await?;
    let _ = std::fs::remove_file(workdir.paths.snapshot_file());
    workdir.cleanup();
    Ok(ExitCode::Quit)
}

/// Standalone index/constraint build against an existing work directory:
/// every retained index is enqueued with the IF NOT EXISTS variant.
async fn copy_indexes(conn: ConnArgs, index_jobs: usize) -> Result<ExitCode> {
    let mut workdir = WorkDir::init(conn.dir.clone(), false, true)?;
    workdir.acquire_service_pid_file("copy-indexes")?;

    let catalog = Arc::new(CatalogStore::new());
    catalog
        .load_unchecked(&workdir.paths.schema_json())
        .context("loading schema.json; run clone first")?;
    let run_store: Arc<dyn pgferry_store::RunStore> =
        Arc::new(FsRunStore::new(workdir.paths.run_dir()));

    let index_queue = pgferry_clone::WorkQueue::bounded(1024);
    let vacuum_queue = pgferry_clone::WorkQueue::bounded(1024);
    let pool = pgferry_clone::indexes::IndexPool::new(
        index_queue.clone(),
        vacuum_queue,
        run_store,
        Arc::clone(&catalog),
        true,
        true,
        false,
    );
    let supervisor = pgferry_clone::Supervisor::new();
    let mut workers = Vec::new();
    for worker in 0..index_jobs.max(1) {
        let session = Session::connect(&conn.target)
            .await
            .map_err(|e| anyhow::anyhow!("target: {e}"))?;
        workers.push(tokio::spawn(pgferry_clone::indexes::index_worker(
            Arc::clone(&pool),
            worker,
            pgferry_pgsql::PgExecutor::new(session),
            supervisor.stop_flag(),
        )));
    }

    for index in catalog.indexes() {
        index_queue
            .send(pgferry_clone::IndexMsg::Build(index.oid))
            .await;
    }
    pool.send_stop(index_jobs.max(1)).await;
    let mut failed = false;
    for worker in workers {
        if worker.await.map(|r| r.is_err()).unwrap_or(true) {
            failed = true;
        }
    }
    workdir.cleanup();
    if failed {
        return Ok(ExitCode::Target);
    }
    Ok(ExitCode::Success)
}

fn inspect(dir: Option<PathBuf>) -> Result<ExitCode> {
    let paths = pgferry_store::Paths::new(
        dir.unwrap_or_else(pgferry_store::Paths::default_root),
    );
    let state = WorkDir::inspect_at(&paths)?;
    println!("directory:    {}", paths.root.display());
    println!("exists:       {}", state.exists);
    println!("schema.json:  {}", state.has_schema_json);
    println!("snapshot:     {}", state.has_snapshot);
    println!("done markers: {}", state.done_markers);
    match state.recorded_pid {
        Some(pid) => println!("pid:          {pid}"),
        None => println!("pid:          -"),
    }
    Ok(ExitCode::Success)
}

async fn sentinel(conn: ConnArgs, action: SentinelAction) -> Result<ExitCode> {
    let source = Session::connect(&conn.source)
        .await
        .map_err(|e| anyhow::anyhow!("source: {e}"))?;
    match action {
        SentinelAction::Get => {
            let sentinel = SentinelStore::get(&source).await?;
            println!("{}", serde_json::to_string_pretty(&sentinel)?);
        }
        SentinelAction::SetEndpos { endpos } => {
            let endpos: Lsn = endpos
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid endpos: {e}"))?;
            SentinelStore::set_endpos(&source, Some(endpos)).await?;
            info!(endpos = %endpos, "sentinel endpos set");
        }
        SentinelAction::EnableApply => {
            SentinelStore::enable_apply(&source).await?;
        }
    }
    Ok(ExitCode::Success)
}
