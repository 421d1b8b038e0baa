// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pgferry-pgsql: everything that talks to a live PostgreSQL.
//!
//! Source and target sessions, the snapshot lifecycle, catalog
//! introspection, COPY streaming, the change-stream source, the sentinel
//! record, and replication origins. Higher layers depend on the capability
//! traits here ([`ChangeSource`], [`SqlExecutor`]) so their logic is
//! testable without a server.

pub mod conn;
pub mod copy;
pub mod executor;
pub mod introspect;
pub mod origin;
pub mod sentinel;
pub mod sequences;
pub mod slot;
pub mod snapshot;
pub mod source;

pub use conn::{PgError, Session, SourceInfo};
pub use copy::stream_table_part;
pub use executor::{ExecError, PgExecutor, SqlExecutor};
pub use introspect::{fetch_schema, FetchedSchema};
pub use origin::OriginTracker;
pub use sentinel::{SentinelStore, SentinelStoreError, SENTINEL_SCHEMA};
pub use sequences::{reset_sequences, resync_sequences};
pub use slot::SlotHandle;
pub use snapshot::{import_snapshot, SnapshotError, SnapshotKind, SnapshotManager, SnapshotState};
pub use source::{ChangeSource, RawChange, SlotChangeSource};
