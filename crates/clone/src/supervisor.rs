// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker supervisor.
//!
//! Owns every spawned worker handle and a single stop flag. `shutdown`
//! flips the flag; workers observe it at their blocking points, finish
//! their current unit to a safe point, and exit. Registered OS resources
//! (PID files and friends) are released in reverse registration order on
//! every exit path; a release failure is logged and ignored.

use crate::error::CloneError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Why the run is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    FailFast,
    Finished,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ShutdownReason::Signal => "signal",
            ShutdownReason::FailFast => "fail-fast",
            ShutdownReason::Finished => "finished",
        };
        write!(f, "{reason}")
    }
}

/// Shared stop flag, observed by every blocking loop.
#[derive(Clone)]
pub struct StopFlag {
    rx: watch::Receiver<bool>,
}

impl StopFlag {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag trips (immediately if it already has).
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Clonable handle for requesting shutdown from outside the supervisor
/// (signal handlers, the entry point).
#[derive(Clone)]
pub struct ShutdownHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self, reason: ShutdownReason) {
        if !*self.stop_tx.borrow() {
            info!(%reason, "shutdown requested");
            let _ = self.stop_tx.send(true);
        }
    }
}

type Resource = (String, Box<dyn FnOnce() + Send>);

/// Owns worker handles, the stop flag, and the ordered resource registry.
pub struct Supervisor {
    stop_tx: Arc<watch::Sender<bool>>,
    stop: StopFlag,
    workers: Vec<(String, JoinHandle<Result<(), CloneError>>)>,
    resources: Vec<Resource>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (stop_tx, rx) = watch::channel(false);
        Supervisor {
            stop_tx: Arc::new(stop_tx),
            stop: StopFlag { rx },
            workers: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Spawn a worker task under this supervisor.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = Result<(), CloneError>> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);
        self.workers.push((name, handle));
    }

    /// Register a resource released at shutdown. Releases run in reverse
    /// registration order, so register the logging resource first.
    pub fn register_resource(
        &mut self,
        name: impl Into<String>,
        release: Box<dyn FnOnce() + Send>,
    ) {
        self.resources.push((name.into(), release));
    }

    /// Flip the stop flag. Idempotent.
    pub fn shutdown(&self, reason: ShutdownReason) {
        if !*self.stop_tx.borrow() {
            info!(%reason, "shutdown requested");
            let _ = self.stop_tx.send(true);
        }
    }

    /// Wait for every worker, collecting failures. Resources are released
    /// afterwards in reverse order regardless of outcome.
    pub async fn wait_all(&mut self) -> Vec<(String, CloneError)> {
        let mut failures = Vec::new();
        for (name, handle) in self.workers.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(worker = %name, error = %e, "worker failed");
                    failures.push((name, e));
                }
                Err(join_err) => {
                    warn!(worker = %name, error = %join_err, "worker panicked or was aborted");
                    failures.push((name, CloneError::Internal(join_err.to_string())));
                }
            }
        }
        self.release_resources();
        failures
    }

    fn release_resources(&mut self) {
        while let Some((name, release)) = self.resources.pop() {
            info!(resource = %name, "releasing");
            release();
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown(ShutdownReason::Finished);
        self.release_resources();
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
