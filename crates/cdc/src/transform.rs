// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The transform stage: one SQL text line per received envelope.
//!
//! Transaction framing, keepalives, and segment switches travel as SQL
//! comments carrying their metadata, so the apply stage never parses JSON.
//! DML renders as parameterized-by-text SQL with standard single-quote
//! doubling; bit strings keep their `B'...'` prefix; NULLs render as
//! `NULL` (`IS NULL` in WHERE clauses).

use crate::decoder::{DecodeError, PkeyLookup, PluginDecoder};
use pgferry_core::sqltext::{qualified, quote_ident, quote_literal};
use pgferry_core::{DmlMessage, Envelope, StreamAction, Tuple, TupleValue};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("bad envelope line: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Render one envelope as one SQL line (no trailing newline).
pub fn transform_envelope(
    envelope: &Envelope,
    decoder: &dyn PluginDecoder,
    pkeys: &dyn PkeyLookup,
) -> Result<String, TransformError> {
    if envelope.filter_out {
        return Ok(format!("-- FILTERED lsn={}", envelope.lsn));
    }
    let line = match envelope.action {
        StreamAction::Begin => format!(
            "-- BEGIN xid={} lsn={} commitLsn={}",
            envelope.xid.unwrap_or_default(),
            envelope.lsn,
            envelope
                .commit_lsn
                .map(|lsn| lsn.to_string())
                .unwrap_or_else(|| "?".to_string()),
        ),
        StreamAction::Commit => format!(
            "-- COMMIT xid={} lsn={} commitLsn={} ts={}",
            envelope.xid.unwrap_or_default(),
            envelope.lsn,
            envelope.commit_lsn.unwrap_or(envelope.lsn),
            envelope.timestamp.as_deref().unwrap_or_default(),
        ),
        StreamAction::Keepalive => format!(
            "-- KEEPALIVE lsn={} ts={}",
            envelope.lsn,
            envelope.timestamp.as_deref().unwrap_or_default(),
        ),
        StreamAction::SwitchWal => format!("-- SWITCH WAL lsn={}", envelope.lsn),
        StreamAction::Message => format!("-- MESSAGE lsn={}", envelope.lsn),
        StreamAction::Insert
        | StreamAction::Update
        | StreamAction::Delete
        | StreamAction::Truncate => {
            let message = decoder.parse_dml(envelope, pkeys)?;
            render_dml(&message)?
        }
    };
    Ok(line)
}

fn render_dml(message: &DmlMessage) -> Result<String, TransformError> {
    let qname = qualified(&message.nspname, &message.relname);
    let missing = |what: &'static str| {
        TransformError::Decode(DecodeError::Malformed {
            what,
            input: qname.clone(),
        })
    };
    let sql = match message.action {
        StreamAction::Insert => {
            let tuple = message.new_tuple.as_ref().ok_or_else(|| missing("new tuple"))?;
            let columns: Vec<String> =
                tuple.columns.iter().map(|c| quote_ident(c)).collect();
            let values: Vec<String> = tuple.values.iter().map(render_value).collect();
            format!(
                "INSERT INTO {qname} ({}) VALUES ({});",
                columns.join(", "),
                values.join(", ")
            )
        }
        StreamAction::Update => {
            let new_tuple = message.new_tuple.as_ref().ok_or_else(|| missing("new tuple"))?;
            let old_tuple = message.old_tuple.as_ref().ok_or_else(|| missing("old tuple"))?;
            format!(
                "UPDATE {qname} SET {} WHERE {};",
                assignments(new_tuple).join(", "),
                conditions(old_tuple).join(" AND ")
            )
        }
        StreamAction::Delete => {
            let old_tuple = message.old_tuple.as_ref().ok_or_else(|| missing("old tuple"))?;
            format!(
                "DELETE FROM {qname} WHERE {};",
                conditions(old_tuple).join(" AND ")
            )
        }
        StreamAction::Truncate => format!("TRUNCATE ONLY {qname};"),
        _ => return Err(missing("DML action")),
    };
    Ok(sql)
}

fn render_value(value: &TupleValue) -> String {
    if value.is_null {
        "NULL".to_string()
    } else if value.is_quoted {
        quote_literal(&value.str)
    } else {
        value.str.clone()
    }
}

fn assignments(tuple: &Tuple) -> Vec<String> {
    tuple
        .columns
        .iter()
        .zip(&tuple.values)
        .map(|(column, value)| format!("{} = {}", quote_ident(column), render_value(value)))
        .collect()
}

fn conditions(tuple: &Tuple) -> Vec<String> {
    tuple
        .columns
        .iter()
        .zip(&tuple.values)
        .map(|(column, value)| {
            if value.is_null {
                format!("{} IS NULL", quote_ident(column))
            } else {
                format!("{} = {}", quote_ident(column), render_value(value))
            }
        })
        .collect()
}

/// Transform one closed segment file into its `.sql` sibling.
///
/// Transactions are buffered until their COMMIT so the BEGIN comment can
/// carry the commit LSN; apply uses it to skip already-replayed
/// transactions without executing them. A transaction still open at end
/// of file is flushed with an unknown commit LSN (it continues in the
/// next segment). The output lands via tmp + rename, so apply never
/// reads a half-written file.
pub fn transform_file(
    json_path: &Path,
    sql_path: &Path,
    decoder: &dyn PluginDecoder,
    pkeys: &dyn PkeyLookup,
) -> Result<usize, TransformError> {
    let io_err = |path: &Path, e: std::io::Error| TransformError::Io {
        path: path.display().to_string(),
        source: e,
    };

    let input = std::fs::File::open(json_path).map_err(|e| io_err(json_path, e))?;
    let tmp_path = sql_path.with_extension("sql.tmp");
    let mut out = std::fs::File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;

    let mut lines = 0usize;
    let mut txn: Vec<Envelope> = Vec::new();
    let mut in_txn = false;

    let mut flush_txn = |txn: &mut Vec<Envelope>,
                         out: &mut std::fs::File,
                         lines: &mut usize|
     -> Result<(), TransformError> {
        for envelope in txn.drain(..) {
            let sql = transform_envelope(&envelope, decoder, pkeys)?;
            writeln!(out, "{sql}").map_err(|e| io_err(&tmp_path, e))?;
            *lines += 1;
        }
        Ok(())
    };

    for line in BufReader::new(input).lines() {
        let line = line.map_err(|e| io_err(json_path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = serde_json::from_str(&line)?;
        match envelope.action {
            StreamAction::Begin => {
                flush_txn(&mut txn, &mut out, &mut lines)?;
                in_txn = true;
                txn.push(envelope);
            }
            StreamAction::Commit if in_txn => {
                let commit_lsn = envelope.commit_lsn;
                if let Some(begin) = txn.first_mut() {
                    begin.commit_lsn = commit_lsn;
                }
                txn.push(envelope);
                in_txn = false;
                flush_txn(&mut txn, &mut out, &mut lines)?;
            }
            _ if in_txn => txn.push(envelope),
            _ => {
                let sql = transform_envelope(&envelope, decoder, pkeys)?;
                writeln!(out, "{sql}").map_err(|e| io_err(&tmp_path, e))?;
                lines += 1;
            }
        }
    }
    // A transaction spilling into the next segment flushes without a
    // known commit LSN.
    flush_txn(&mut txn, &mut out, &mut lines)?;

    out.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, sql_path).map_err(|e| io_err(sql_path, e))?;

    info!(
        from = %json_path.display(),
        to = %sql_path.display(),
        lines,
        "transformed segment"
    );
    Ok(lines)
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
