// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bulk-copy streaming: source `COPY ... TO STDOUT` piped straight into a
//! target `COPY ... FROM STDIN`, no intermediate file.

use crate::conn::{PgError, Session};
use futures::{pin_mut, SinkExt, TryStreamExt};
use pgferry_core::{SourceTable, TablePart};
use tracing::debug;

/// The source-side COPY statement for one table slice.
pub fn copy_out_sql(table: &SourceTable, part: &TablePart) -> String {
    match part.where_clause() {
        Some(clause) => format!(
            "COPY (SELECT * FROM {} WHERE {}) TO STDOUT",
            table.qname(),
            clause
        ),
        None => format!("COPY {} TO STDOUT", table.qname()),
    }
}

/// The target-side COPY statement.
pub fn copy_in_sql(table: &SourceTable) -> String {
    format!("COPY {} FROM STDIN", table.qname())
}

/// Stream one table slice from source to target.
///
/// Returns the number of rows the target reported ingesting.
pub async fn stream_table_part(
    source: &Session,
    target: &Session,
    table: &SourceTable,
    part: &TablePart,
) -> Result<u64, PgError> {
    let out_sql = copy_out_sql(table, part);
    let in_sql = copy_in_sql(table);
    debug!(
        table = %table.qname(),
        part = part.part_number,
        of = part.part_count,
        "streaming table data"
    );

    let sink = target.client.copy_in(in_sql.as_str()).await?;
    pin_mut!(sink);
    let stream = source.client.copy_out(out_sql.as_str()).await?;
    pin_mut!(stream);

    while let Some(buf) = stream.try_next().await? {
        sink.send(buf).await?;
    }
    let rows = sink.finish().await?;
    Ok(rows)
}

#[cfg(test)]
#[path = "copy_tests.rs"]
mod tests;
