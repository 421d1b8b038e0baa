// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The follow runner: composes receive, transform, and apply according to
//! the requested mode.
//!
//! - `receive`: segment files only
//! - `prefetch`: receive + transform (SQL files ready for later catchup)
//! - `catchup`: all three, apply gated on the sentinel's apply flag
//! - `replay`: all three wired in memory, no intermediate files
//!
//! Receive and transform run concurrently: each segment file is
//! transformed on a blocking task as soon as rotation closes it, while
//! the next segment is being received.

use crate::apply::{ApplyConfig, ApplyError, ApplyOutcome, ApplyStage};
use crate::decoder::{decoder_for, DecodeError};
use crate::receive::{ReceiveConfig, ReceiveError, ReceiveStage};
use crate::segment::{segment_file_name, SegmentWriter};
use crate::setup::{setup_databases, SetupError, SetupResult};
use crate::transform::{transform_envelope, transform_file, TransformError};
use pgferry_core::{CdcMode, FollowOptions, SystemClock};
use pgferry_pgsql::{
    PgError, PgExecutor, SentinelStore, SentinelStoreError, Session, SlotChangeSource,
};
use pgferry_store::{CatalogStore, LsnFile, LsnFileError, Paths};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FollowError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Receive(#[from] ReceiveError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Sentinel(#[from] SentinelStoreError),
    #[error(transparent)]
    LsnFile(#[from] LsnFileError),
    #[error("source: {0}")]
    Source(#[source] PgError),
    #[error("transform worker failed: {0}")]
    TransformWorker(String),
}

/// How the follow loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// Replay reached endpos; the clean-quit exit code applies.
    ReachedEndpos,
    /// The stop flag tripped.
    Stopped,
}

pub struct FollowRunner {
    pub paths: Paths,
    pub catalog: Arc<CatalogStore>,
    pub source_conninfo: String,
    pub target_conninfo: String,
    pub options: FollowOptions,
    pub stop: watch::Receiver<bool>,
}

impl FollowRunner {
    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn connect_source(&self) -> Result<Session, FollowError> {
        Session::connect(&self.source_conninfo)
            .await
            .map_err(FollowError::Source)
    }

    /// The pipeline entry point.
    pub async fn run(&self, mode: CdcMode) -> Result<FollowOutcome, FollowError> {
        let source = self.connect_source().await?;
        let target = Session::connect(&self.target_conninfo)
            .await
            .map_err(FollowError::Source)?;
        let setup = setup_databases(&self.paths, &source, target, &self.options).await?;

        let outcome = match mode {
            CdcMode::Receive | CdcMode::Prefetch => {
                self.receive_loop(&source, &setup, mode == CdcMode::Prefetch)
                    .await?
            }
            CdcMode::Catchup => self.catchup(&source, &setup).await?,
            CdcMode::Replay => self.replay(&source, &setup).await?,
        };

        // Logical decoding never carries sequence positions; re-sync them
        // once replay is done.
        if outcome == FollowOutcome::ReachedEndpos
            && matches!(mode, CdcMode::Catchup | CdcMode::Replay)
        {
            let target = Session::connect(&self.target_conninfo)
                .await
                .map_err(FollowError::Source)?;
            pgferry_pgsql::resync_sequences(&source, &target, &self.catalog.sequences())
                .await
                .map_err(FollowError::Source)?;
        }
        Ok(outcome)
    }

    fn build_receive(&self, setup: &SetupResult, source_session: Session) -> Result<ReceiveStage<SlotChangeSource, SystemClock>, FollowError> {
        let decoder = decoder_for(&self.options.plugin)?;
        let slot_options = decoder
            .slot_options()
            .into_iter()
            .collect::<Vec<(String, String)>>();
        let change_source = SlotChangeSource::new(
            source_session,
            self.source_conninfo.clone(),
            self.options.slot_name.clone(),
            slot_options,
        );
        let writer = SegmentWriter::new(
            self.paths.cdc_dir(),
            setup.timeline,
            setup.wal_segment_size,
        );
        let mut lsn_file = LsnFile::open(&self.paths.lsn_json(), setup.startpos)?;
        lsn_file.set_endpos(setup.endpos)?;

        Ok(ReceiveStage::new(
            change_source,
            decoder,
            writer,
            lsn_file,
            SystemClock,
            ReceiveConfig {
                endpos: setup.endpos,
                ..ReceiveConfig::default()
            },
        ))
    }

    fn sql_path_for(&self, json_path: &Path) -> PathBuf {
        json_path.with_extension("sql")
    }

    /// Transform one closed segment on a blocking task.
    async fn transform_closed(&self, json_path: PathBuf) -> Result<(), FollowError> {
        let sql_path = self.sql_path_for(&json_path);
        let decoder = decoder_for(&self.options.plugin)?;
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || {
            transform_file(&json_path, &sql_path, decoder.as_ref(), catalog.as_ref())
        })
        .await
        .map_err(|e| FollowError::TransformWorker(e.to_string()))??;
        Ok(())
    }

    /// Receive (and optionally transform) until endpos or stop.
    async fn receive_loop(
        &self,
        source: &Session,
        setup: &SetupResult,
        prefetch: bool,
    ) -> Result<FollowOutcome, FollowError> {
        let change_session = self.connect_source().await?;
        let mut receive = self.build_receive(setup, change_session)?;

        loop {
            if self.stopped() {
                for closed in receive.finish()? {
                    if prefetch {
                        self.transform_closed(closed).await?;
                    }
                }
                return Ok(FollowOutcome::Stopped);
            }

            let tick = receive.run_once().await?;
            for closed in &tick.closed {
                if prefetch {
                    self.transform_closed(closed.clone()).await?;
                }
            }
            // Mirror progress into the sentinel so WAL can be released.
            SentinelStore::advance(
                source,
                Some(tick.write_lsn),
                Some(tick.flush_lsn),
                None,
            )
            .await?;

            if tick.reached_endpos {
                info!("receive reached endpos");
                if prefetch {
                    for closed in receive.finish()? {
                        self.transform_closed(closed).await?;
                    }
                }
                return Ok(FollowOutcome::ReachedEndpos);
            }
            if tick.idle || tick.retrying {
                tokio::time::sleep(receive.poll_interval()).await;
            }
        }
    }

    /// Wait for the clone to flip the sentinel's apply flag.
    async fn wait_for_apply_flag(&self, source: &Session) -> Result<(), FollowError> {
        loop {
            if self.stopped() {
                return Ok(());
            }
            let sentinel = SentinelStore::get(source).await?;
            if sentinel.apply {
                return Ok(());
            }
            debug!("waiting for sentinel apply flag");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Full catchup: receive + transform feeding apply over SQL files.
    async fn catchup(
        &self,
        source: &Session,
        setup: &SetupResult,
    ) -> Result<FollowOutcome, FollowError> {
        // Receive+transform run as their own task so apply lags behind
        // without stalling reception.
        let receiver = FollowRunner {
            paths: self.paths.clone(),
            catalog: Arc::clone(&self.catalog),
            source_conninfo: self.source_conninfo.clone(),
            target_conninfo: self.target_conninfo.clone(),
            options: self.options.clone(),
            stop: self.stop.clone(),
        };
        let setup_clone = setup.clone();
        let receive_task = tokio::spawn(async move {
            let source = receiver.connect_source().await?;
            receiver.receive_loop(&source, &setup_clone, true).await
        });

        let outcome = self.apply_loop(source, setup).await;
        let receive_outcome = receive_task
            .await
            .map_err(|e| FollowError::TransformWorker(e.to_string()))?;
        // Apply's verdict wins; receive stopping early is fine.
        let _ = receive_outcome?;
        outcome
    }

    /// The apply side of catchup: follow SQL files from the replay
    /// position, gated on the sentinel.
    async fn apply_loop(
        &self,
        source: &Session,
        setup: &SetupResult,
    ) -> Result<FollowOutcome, FollowError> {
        self.wait_for_apply_flag(source).await?;
        if self.stopped() {
            return Ok(FollowOutcome::Stopped);
        }

        let target = Session::connect(&self.target_conninfo)
            .await
            .map_err(FollowError::Source)?;
        let mut stage = ApplyStage::start(
            ApplyConfig {
                origin: self.options.origin_name.clone(),
                endpos: setup.endpos,
            },
            PgExecutor::new(target),
        )
        .await?;

        let start_lsn = stage.replay_lsn().max(setup.startpos);
        let mut current = self.paths.cdc_dir().join(segment_file_name(
            setup.timeline,
            start_lsn,
            setup.wal_segment_size,
            "sql",
        ));
        let mut lsn_file = LsnFile::open(&self.paths.lsn_json(), setup.startpos)?;

        loop {
            if self.stopped() {
                return Ok(FollowOutcome::Stopped);
            }
            // Refresh endpos: operators can set it while replay runs.
            let sentinel = SentinelStore::get(source).await?;
            stage.set_endpos(sentinel.endpos.or(setup.endpos));

            if !current.exists() {
                match next_sql_file(&self.paths.cdc_dir(), &current) {
                    Some(next) => {
                        current = next;
                    }
                    None => {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        continue;
                    }
                }
            }

            let outcome = stage.apply_file(&current, |_| {}).await?;
            lsn_file.advance(None, None, Some(stage.replay_lsn()))?;
            SentinelStore::advance(source, None, None, Some(stage.replay_lsn())).await?;

            match outcome {
                ApplyOutcome::ReachedEndpos => {
                    info!(replay_lsn = %stage.replay_lsn(), "apply reached endpos");
                    return Ok(FollowOutcome::ReachedEndpos);
                }
                ApplyOutcome::SwitchTo(lsn) => {
                    current = self.paths.cdc_dir().join(segment_file_name(
                        setup.timeline,
                        lsn,
                        setup.wal_segment_size,
                        "sql",
                    ));
                }
                ApplyOutcome::EndOfFile => {
                    // More data lands in a later segment; move on when it
                    // shows up.
                    match next_sql_file(&self.paths.cdc_dir(), &current) {
                        Some(next) => current = next,
                        None => tokio::time::sleep(Duration::from_millis(200)).await,
                    }
                }
            }
        }
    }

    /// All three stages in memory: no files, one ordered pipeline.
    async fn replay(
        &self,
        source: &Session,
        setup: &SetupResult,
    ) -> Result<FollowOutcome, FollowError> {
        self.wait_for_apply_flag(source).await?;
        if self.stopped() {
            return Ok(FollowOutcome::Stopped);
        }

        let decoder = decoder_for(&self.options.plugin)?;
        let mut change_source = SlotChangeSource::new(
            self.connect_source().await?,
            self.source_conninfo.clone(),
            self.options.slot_name.clone(),
            decoder.slot_options(),
        );

        let target = Session::connect(&self.target_conninfo)
            .await
            .map_err(FollowError::Source)?;
        let mut stage = ApplyStage::start(
            ApplyConfig {
                origin: self.options.origin_name.clone(),
                endpos: setup.endpos,
            },
            PgExecutor::new(target),
        )
        .await?;

        use pgferry_pgsql::ChangeSource as _;
        loop {
            if self.stopped() {
                return Ok(FollowOutcome::Stopped);
            }
            let changes = match change_source.fetch(500).await {
                Ok(changes) => changes,
                Err(e) => {
                    tracing::warn!(error = %e, "change source error, reconnecting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    let _ = change_source.reconnect().await;
                    continue;
                }
            };
            if changes.is_empty() {
                SentinelStore::advance(source, None, None, Some(stage.replay_lsn())).await?;
                if stage.reached_endpos() {
                    return Ok(FollowOutcome::ReachedEndpos);
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
            for change in &changes {
                let envelope = decoder.parse_envelope(change)?;
                if envelope.filter_out {
                    continue;
                }
                let sql = transform_envelope(&envelope, decoder.as_ref(), self.catalog.as_ref())?;
                let mut observe = |_| {};
                if let Some(ApplyOutcome::ReachedEndpos) =
                    stage.apply_line(&sql, &mut observe).await?
                {
                    SentinelStore::advance(source, None, None, Some(stage.replay_lsn()))
                        .await?;
                    return Ok(FollowOutcome::ReachedEndpos);
                }
            }
            SentinelStore::advance(
                source,
                Some(changes.last().map(|c| c.lsn).unwrap_or(stage.replay_lsn())),
                Some(stage.replay_lsn()),
                Some(stage.replay_lsn()),
            )
            .await?;
        }
    }
}

/// The next `.sql` segment after `current`, by file-name order.
fn next_sql_file(cdc_dir: &Path, current: &Path) -> Option<PathBuf> {
    let current_name = current.file_name()?.to_string_lossy().to_string();
    let mut names: Vec<String> = std::fs::read_dir(cdc_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".sql"))
        .collect();
    names.sort();
    names
        .into_iter()
        .find(|name| *name > current_name)
        .map(|name| cdc_dir.join(name))
}

#[cfg(test)]
#[path = "follow_tests.rs"]
mod tests;
