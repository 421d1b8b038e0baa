// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process exit codes, observable by wrappers.

use std::fmt;

/// The contract with whoever wraps the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    BadArgs = 1,
    Internal = 2,
    /// Source-side database error.
    Source = 3,
    /// Target-side database error.
    Target = 4,
    Config = 5,
    /// Clean stop requested (endpos reached, signal received).
    Quit = 6,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Success => "success",
            ExitCode::BadArgs => "bad-arguments",
            ExitCode::Internal => "internal-error",
            ExitCode::Source => "source-error",
            ExitCode::Target => "target-error",
            ExitCode::Config => "config-error",
            ExitCode::Quit => "quit",
        };
        write!(f, "{name}")
    }
}
