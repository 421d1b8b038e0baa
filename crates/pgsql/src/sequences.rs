// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequence value re-sync. Neither bulk copy nor logical decoding carries
//! sequence positions, so they are set explicitly at the end of a clone
//! and after CDC apply finishes.

use crate::conn::{PgError, Session};
use pgferry_core::sqltext::quote_literal;
use pgferry_core::SourceSequence;
use tracing::{info, warn};

/// Set every sequence's current value on the target.
///
/// Failures are per-sequence: logged and counted, never fatal.
pub async fn reset_sequences(target: &Session, sequences: &[SourceSequence]) -> Result<usize, PgError> {
    let mut reset = 0usize;
    for sequence in sequences {
        let sql = format!(
            "SELECT pg_catalog.setval({}, {}, {})",
            quote_literal(&sequence.qname()),
            sequence.last_value.max(1),
            sequence.is_called,
        );
        match target.client.simple_query(&sql).await {
            Ok(_) => reset += 1,
            Err(e) => {
                warn!(sequence = %sequence.qname(), error = %e, "sequence reset failed");
            }
        }
    }
    if reset > 0 {
        info!(sequences = reset, "sequence values reset");
    }
    Ok(reset)
}

/// Re-read every sequence's current value from the source and set it on
/// the target. Used when replay finishes: logical decoding does not
/// carry sequence positions, so the clone-time values are stale by then.
pub async fn resync_sequences(
    source: &Session,
    target: &Session,
    sequences: &[SourceSequence],
) -> Result<usize, PgError> {
    let mut fresh = Vec::with_capacity(sequences.len());
    for sequence in sequences {
        let row = match source
            .simple_query_opt(&format!(
                "SELECT last_value, is_called FROM {}",
                sequence.qname()
            ))
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => continue,
            Err(e) => {
                warn!(sequence = %sequence.qname(), error = %e, "sequence read failed");
                continue;
            }
        };
        let mut updated = sequence.clone();
        updated.last_value = row.get(0).and_then(|s| s.parse().ok()).unwrap_or(1);
        updated.is_called = row.get(1) == Some("t");
        fresh.push(updated);
    }
    reset_sequences(target, &fresh).await
}
