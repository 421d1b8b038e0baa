// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CDC setup and teardown: the slot and sentinel on the source, the
//! origin on the target, and the `cdc/` bookkeeping files.

use pgferry_core::{FollowOptions, Lsn};
use pgferry_pgsql::{
    ExecError, OriginTracker, PgError, PgExecutor, SentinelStore, SentinelStoreError, Session,
    SlotHandle, SourceInfo,
};
use pgferry_store::files::{atomic_write_text, FileError};
use pgferry_store::Paths;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("source: {0}")]
    Source(#[source] PgError),
    #[error("target: {0}")]
    Target(#[source] ExecError),
    #[error(transparent)]
    Sentinel(#[from] SentinelStoreError),
    #[error(transparent)]
    File(#[from] FileError),
}

/// What setup established, used by every later stage.
#[derive(Debug, Clone)]
pub struct SetupResult {
    pub startpos: Lsn,
    pub endpos: Option<Lsn>,
    pub timeline: u32,
    pub wal_segment_size: u64,
}

/// Prepare both databases for the change stream.
///
/// On the source: create the slot if missing (capturing its creation LSN
/// as the sentinel's startpos) or reuse it, and make sure the sentinel
/// row exists. On the target: create the replication origin if missing
/// and advance it to startpos. The `cdc/` files record everything a
/// restarted process needs.
pub async fn setup_databases(
    paths: &Paths,
    source: &Session,
    target: Session,
    options: &FollowOptions,
) -> Result<SetupResult, SetupError> {
    let source_info = SourceInfo::fetch(source).await.map_err(SetupError::Source)?;

    let slot = SlotHandle::new(&options.slot_name);
    let startpos = if slot.exists(source).await.map_err(SetupError::Source)? {
        // Reuse: the sentinel remembers where this stream started.
        match SentinelStore::get(source).await {
            Ok(sentinel) => sentinel.startpos,
            Err(SentinelStoreError::Missing) => slot
                .confirmed_flush_lsn(source)
                .await
                .map_err(SetupError::Source)?,
            Err(e) => return Err(e.into()),
        }
    } else {
        slot.create(source, &options.plugin)
            .await
            .map_err(SetupError::Source)?
    };

    SentinelStore::init(source, startpos, options.endpos).await?;

    // Record the stream's identity for resume and for operators.
    atomic_write_text(&paths.slot_file(), &format!("{}\n", options.slot_name))?;
    atomic_write_text(&paths.origin_file(), &format!("{}\n", options.origin_name))?;
    atomic_write_text(&paths.tli_file(), &format!("{}\n", source_info.timeline))?;
    atomic_write_text(
        &paths.tli_history_file(),
        &format!("{}\t{}\n", source_info.timeline, startpos),
    )?;
    atomic_write_text(
        &paths.wal_segment_size_file(),
        &format!("{}\n", source_info.wal_segment_size),
    )?;

    // Target side: the origin tracks replay progress.
    let mut executor = PgExecutor::new(target);
    let origin = OriginTracker::new(&options.origin_name);
    let created = origin.ensure(&mut executor).await.map_err(SetupError::Target)?;
    if created {
        origin
            .advance(&mut executor, startpos)
            .await
            .map_err(SetupError::Target)?;
    }

    info!(
        slot = %options.slot_name,
        origin = %options.origin_name,
        startpos = %startpos,
        timeline = source_info.timeline,
        "databases prepared for change streaming"
    );

    Ok(SetupResult {
        startpos,
        endpos: options.endpos,
        timeline: source_info.timeline,
        wal_segment_size: source_info.wal_segment_size,
    })
}

/// Drop the slot, the sentinel, and the origin (end of the migration).
pub async fn teardown_databases(
    source: &Session,
    target: Session,
    options: &FollowOptions,
) -> Result<(), SetupError> {
    let slot = SlotHandle::new(&options.slot_name);
    if slot.exists(source).await.map_err(SetupError::Source)? {
        slot.drop(source).await.map_err(SetupError::Source)?;
    }
    SentinelStore::teardown(source).await?;

    let mut executor = PgExecutor::new(target);
    let origin = OriginTracker::new(&options.origin_name);
    origin.drop(&mut executor).await.map_err(SetupError::Target)?;
    info!("change streaming torn down");
    Ok(())
}
