// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The receive stage.
//!
//! Consumes raw changes from the [`ChangeSource`], wraps each into the
//! uniform envelope, and appends it to the current segment file. Idle
//! rounds synthesize keepalives so downstream origins keep moving; every
//! round reports write/flush positions into the LSN tracking file (the
//! follow runner mirrors them into the sentinel so the source can release
//! WAL). Transient source errors reconnect with a one-second backoff and
//! resume from the last written position.

use crate::decoder::PluginDecoder;
use crate::segment::{SegmentError, SegmentWriter};
use pgferry_core::{Clock, Envelope, Lsn};
use pgferry_pgsql::{ChangeSource, PgError};
use pgferry_store::{LsnFile, LsnFileError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("source: {0}")]
    Source(#[from] PgError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    LsnFile(#[from] LsnFileError),
    #[error("decode: {0}")]
    Decode(#[from] crate::decoder::DecodeError),
}

#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    /// Changes fetched per round.
    pub batch_size: u32,
    /// Idle sleep between empty rounds.
    pub poll_interval: Duration,
    /// How often an idle stream emits a synthetic keepalive.
    pub keepalive_interval: Duration,
    /// Backoff before reconnecting after a source error.
    pub retry_backoff: Duration,
    pub endpos: Option<Lsn>,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        ReceiveConfig {
            batch_size: 500,
            poll_interval: Duration::from_millis(200),
            keepalive_interval: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(1),
            endpos: None,
        }
    }
}

/// What one receive round produced.
#[derive(Debug, Default)]
pub struct ReceiveTick {
    pub wrote: usize,
    pub write_lsn: Lsn,
    pub flush_lsn: Lsn,
    /// Segment files closed by rotation, ready for transform.
    pub closed: Vec<PathBuf>,
    /// Nothing was pending on the source this round.
    pub idle: bool,
    /// The flushed position passed the stop position.
    pub reached_endpos: bool,
    /// The round hit a transient source error and will retry.
    pub retrying: bool,
}

/// Receive loop state.
pub struct ReceiveStage<S, C> {
    source: S,
    decoder: Box<dyn PluginDecoder>,
    writer: SegmentWriter,
    lsn_file: LsnFile,
    clock: C,
    config: ReceiveConfig,
    last_keepalive: Option<std::time::Instant>,
}

impl<S: ChangeSource, C: Clock> ReceiveStage<S, C> {
    pub fn new(
        source: S,
        decoder: Box<dyn PluginDecoder>,
        writer: SegmentWriter,
        lsn_file: LsnFile,
        clock: C,
        config: ReceiveConfig,
    ) -> Self {
        ReceiveStage {
            source,
            decoder,
            writer,
            lsn_file,
            clock,
            config,
            last_keepalive: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    pub fn tracking(&self) -> &pgferry_core::LsnTracking {
        self.lsn_file.tracking()
    }

    /// One fetch-decode-write-flush round.
    pub async fn run_once(&mut self) -> Result<ReceiveTick, ReceiveError> {
        let mut tick = ReceiveTick::default();

        let changes = match self.source.fetch(self.config.batch_size).await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "change source error, reconnecting");
                tokio::time::sleep(self.config.retry_backoff).await;
                if let Err(e) = self.source.reconnect().await {
                    warn!(error = %e, "reconnect failed, will retry");
                }
                tick.retrying = true;
                return Ok(tick);
            }
        };

        if changes.is_empty() {
            tick.idle = true;
            // Keep the stream warm: an occasional keepalive carrying the
            // source clock lets apply advance its origin past quiet
            // stretches.
            let due = self
                .last_keepalive
                .map_or(true, |at| at.elapsed() >= self.config.keepalive_interval);
            if due {
                let lsn =
                    self.writer.written_lsn().max(self.lsn_file.tracking().startpos);
                let timestamp = self
                    .clock
                    .now()
                    .format("%Y-%m-%d %H:%M:%S%.6f+00")
                    .to_string();
                self.writer.append(&Envelope::keepalive(lsn, timestamp))?;
                self.last_keepalive = Some(std::time::Instant::now());
                tick.wrote = 1;
            }
        } else {
            for change in &changes {
                let envelope = self.decoder.parse_envelope(change)?;
                if envelope.filter_out {
                    debug!(lsn = %envelope.lsn, "dropping own-schema message");
                    continue;
                }
                self.writer.append(&envelope)?;
                tick.wrote += 1;
            }
        }

        let flushed = self.writer.flush()?;
        self.lsn_file
            .advance(Some(self.writer.written_lsn()), Some(flushed), None)?;
        tick.write_lsn = self.writer.written_lsn();
        tick.flush_lsn = flushed;
        tick.closed = self.writer.take_closed();

        if let Some(endpos) = self.config.endpos {
            if flushed >= endpos {
                tick.reached_endpos = true;
                self.writer.close_current()?;
                tick.closed.extend(self.writer.take_closed());
            }
        }
        Ok(tick)
    }

    /// Close the current segment (shutdown path); returns it for
    /// transform.
    pub fn finish(&mut self) -> Result<Vec<PathBuf>, ReceiveError> {
        self.writer.close_current()?;
        Ok(self.writer.take_closed())
    }
}

#[cfg(test)]
#[path = "receive_tests.rs"]
mod tests;
