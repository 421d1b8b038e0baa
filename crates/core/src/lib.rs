// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pgferry-core: domain types for the pgferry database cloning and
//! change-data-capture tool. No I/O lives here.

pub mod catalog;
pub mod clock;
pub mod envelope;
pub mod exit;
pub mod filter;
pub mod lsn;
pub mod options;
pub mod sentinel;
pub mod sqltext;

pub use catalog::{
    plan_column_parts, plan_ctid_parts, IndexConstraint, Oid, PartKey, SourceAttr, SourceIndex,
    SourceSequence, SourceTable, TablePart,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use envelope::{DmlMessage, Envelope, StreamAction, Tuple, TupleValue};
pub use exit::ExitCode;
pub use filter::{FilterSet, FilterSpec};
pub use lsn::{Lsn, LsnParseError, TimelineId};
pub use options::{CdcMode, CloneOptions, FollowOptions};
pub use sentinel::{LsnTracking, Sentinel, SentinelError};
