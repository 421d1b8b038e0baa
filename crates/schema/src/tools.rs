// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External tool invocation (`pg_dump`, `pg_restore`).
//!
//! Non-zero exits are non-retryable: the phase aborts.

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },
}

/// Captured output of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run an external tool to completion with captured output.
pub async fn run_tool(tool: &str, args: &[String]) -> Result<ToolOutput, ToolError> {
    info!(tool, args = ?args, "running external tool");

    let output = tokio::process::Command::new(tool)
        .args(args)
        .output()
        .await
        .map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            source: e,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        warn!(tool, code, stderr = %stderr, "external tool failed");
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code,
            stderr,
        });
    }
    if !stderr.is_empty() {
        info!(tool, stderr = %stderr, "tool stderr");
    }
    Ok(ToolOutput { stdout, stderr })
}
