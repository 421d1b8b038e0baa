// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pgferry: clone a running PostgreSQL database to another instance and
//! stream changes until the target converges.
//!
//! Exit codes are part of the contract with wrappers: 0 success, 1 bad
//! arguments, 2 internal error, 3 source-side error, 4 target-side
//! error, 5 configuration error, 6 clean quit (signal or endpos).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod args;
mod commands;
mod logging;

use args::Cli;
use clap::Parser;
use pgferry_core::ExitCode;

fn main() {
    // Parse errors map to the bad-arguments exit code; --help/--version
    // keep clap's success path.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { ExitCode::BadArgs.code() } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let exit = run(cli);
    std::process::exit(exit.code());
}

fn run(cli: Cli) -> ExitCode {
    let _log_guard = match logging::setup(cli.log_file.as_deref(), cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("pgferry: failed to set up logging: {e}");
            return ExitCode::Config;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("pgferry: failed to start runtime: {e}");
            return ExitCode::Internal;
        }
    };

    match runtime.block_on(commands::dispatch(cli)) {
        Ok(exit) => exit,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("pgferry: {e:#}");
            commands::classify(&e)
        }
    }
}
