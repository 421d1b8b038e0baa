// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pgferry-cdc: the logical-decoding receive / transform / apply pipeline.
//!
//! Receive wraps plugin output into JSON envelopes written to per-segment
//! files; transform renders exactly one SQL line per envelope; apply
//! executes the SQL on the target with the replication origin advanced in
//! the same transaction, which makes replay exactly-once.

pub mod apply;
pub mod decoder;
pub mod follow;
pub mod receive;
pub mod segment;
pub mod setup;
pub mod test_decoding;
pub mod transform;
pub mod wal2json;

pub use apply::{ApplyConfig, ApplyError, ApplyOutcome, ApplyStage};
pub use decoder::{decoder_for, DecodeError, PkeyLookup, PluginDecoder};
pub use follow::{FollowError, FollowOutcome, FollowRunner};
pub use receive::{ReceiveConfig, ReceiveError, ReceiveStage, ReceiveTick};
pub use segment::{segment_file_name, SegmentError, SegmentWriter};
pub use setup::{setup_databases, teardown_databases, SetupError, SetupResult};
pub use test_decoding::TestDecodingDecoder;
pub use transform::{transform_envelope, transform_file, TransformError};
pub use wal2json::Wal2jsonDecoder;
