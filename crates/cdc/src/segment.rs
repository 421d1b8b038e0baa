// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-segment change files.
//!
//! Each received envelope lands as one JSON line in the file named after
//! the WAL segment containing its LSN. Crossing a segment boundary closes
//! the current file and opens the next one, whose first line is a
//! synthetic `SWITCH WAL` marker; the `latest` symlink always points at
//! the file being written.

use pgferry_core::{Envelope, Lsn, TimelineId};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> SegmentError {
    SegmentError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// The file name for the segment containing `lsn`.
pub fn segment_file_name(
    timeline: TimelineId,
    lsn: Lsn,
    wal_segment_size: u64,
    extension: &str,
) -> String {
    format!(
        "{timeline:08X}-{}.{extension}",
        lsn.segment_start(wal_segment_size).to_hex()
    )
}

struct OpenSegment {
    segno: u64,
    path: PathBuf,
    file: File,
}

/// Appends envelopes to the current segment file, rotating on boundary.
pub struct SegmentWriter {
    cdc_dir: PathBuf,
    timeline: TimelineId,
    wal_segment_size: u64,
    current: Option<OpenSegment>,
    /// Highest LSN appended (not necessarily durable yet).
    written_lsn: Lsn,
    /// Files closed by rotation, waiting for the transform stage.
    closed: Vec<PathBuf>,
}

impl SegmentWriter {
    pub fn new(cdc_dir: impl Into<PathBuf>, timeline: TimelineId, wal_segment_size: u64) -> Self {
        SegmentWriter {
            cdc_dir: cdc_dir.into(),
            timeline,
            wal_segment_size,
            current: None,
            written_lsn: Lsn::ZERO,
            closed: Vec::new(),
        }
    }

    pub fn written_lsn(&self) -> Lsn {
        self.written_lsn
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|s| s.path.as_path())
    }

    /// Segment files closed by rotation since the last call.
    pub fn take_closed(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.closed)
    }

    /// Append one envelope, rotating first when its LSN lives in a later
    /// segment than the open file.
    pub fn append(&mut self, envelope: &Envelope) -> Result<(), SegmentError> {
        let segno = envelope.lsn.segment_number(self.wal_segment_size);
        let rotate = match &self.current {
            Some(segment) => segno > segment.segno,
            None => true,
        };
        if rotate {
            self.open_segment(segno, envelope.lsn)?;
        }
        self.write_line(envelope)?;
        if envelope.lsn > self.written_lsn {
            self.written_lsn = envelope.lsn;
        }
        Ok(())
    }

    /// Make everything appended so far durable; returns the flushed LSN.
    pub fn flush(&mut self) -> Result<Lsn, SegmentError> {
        if let Some(segment) = &self.current {
            segment.file.sync_all().map_err(|e| io_err(&segment.path, e))?;
        }
        Ok(self.written_lsn)
    }

    /// Close the current file (end of stream); it joins the closed list.
    pub fn close_current(&mut self) -> Result<(), SegmentError> {
        if let Some(segment) = self.current.take() {
            segment.file.sync_all().map_err(|e| io_err(&segment.path, e))?;
            info!(file = %segment.path.display(), "closed segment file");
            self.closed.push(segment.path);
        }
        Ok(())
    }

    fn open_segment(&mut self, segno: u64, lsn: Lsn) -> Result<(), SegmentError> {
        self.close_current()?;

        let name = segment_file_name(self.timeline, lsn, self.wal_segment_size, "json");
        let path = self.cdc_dir.join(&name);
        std::fs::create_dir_all(&self.cdc_dir).map_err(|e| io_err(&self.cdc_dir, e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        debug!(file = %path.display(), segno, "opened segment file");
        self.current = Some(OpenSegment { segno, path, file });

        // Every fresh file starts with the switch marker apply uses to
        // follow rotation.
        self.write_line(&Envelope::switch_wal(lsn))?;
        self.update_latest_symlink(&name)?;
        Ok(())
    }

    fn write_line(&mut self, envelope: &Envelope) -> Result<(), SegmentError> {
        let Some(segment) = &mut self.current else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        segment
            .file
            .write_all(&line)
            .map_err(|e| io_err(&segment.path, e))?;
        Ok(())
    }

    fn update_latest_symlink(&self, name: &str) -> Result<(), SegmentError> {
        let link = self.cdc_dir.join("latest");
        match std::fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&link, e)),
        }
        std::os::unix::fs::symlink(name, &link).map_err(|e| io_err(&link, e))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "segment_tests.rs"]
mod tests;
