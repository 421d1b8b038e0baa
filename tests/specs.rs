// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Behavioral specifications for pgferry.
//!
//! Everything here is hermetic: the change-stream pipeline runs against
//! scripted sources and in-memory progress markers, and the binary is
//! only exercised for its argument surface. Live-database scenarios are
//! exercised by the crate-level tests' fakes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

// cli/
#[path = "specs/cli/surface.rs"]
mod cli_surface;

// pipeline/
#[path = "specs/pipeline/change_stream.rs"]
mod pipeline_change_stream;

// store/
#[path = "specs/store/resume.rs"]
mod store_resume;

// schema/
#[path = "specs/schema/filtering.rs"]
mod schema_filtering;
