// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work directory layout and run state: stable paths, PID files,
//! restart/resume discovery.

use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Stable paths under the work directory.
///
/// ```text
/// <dir>/pgferry.pid                    main service lock
/// <dir>/<service>.pid                  auxiliary service locks
/// <dir>/snapshot                       exported snapshot identifier
/// <dir>/schema/{pre,post}.dump         archive blobs
/// <dir>/schema/{pre,post}-filtered.list filtered restore lists
/// <dir>/schema.json                    catalog snapshot
/// <dir>/run/<unit>                     per-unit lock file
/// <dir>/run/<unit>.done                per-unit done marker
/// <dir>/cdc/...                        change-stream files
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Paths { root: root.into() }
    }

    /// Default root: the system temporary directory plus the product name.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("pgferry")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("pgferry.pid")
    }

    pub fn service_pid_file(&self, service: &str) -> PathBuf {
        self.root.join(format!("{service}.pid"))
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join("snapshot")
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.root.join("schema")
    }

    pub fn dump_file(&self, section: &str) -> PathBuf {
        self.schema_dir().join(format!("{section}.dump"))
    }

    pub fn filtered_list_file(&self, section: &str) -> PathBuf {
        self.schema_dir().join(format!("{section}-filtered.list"))
    }

    pub fn schema_json(&self) -> PathBuf {
        self.root.join("schema.json")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    pub fn cdc_dir(&self) -> PathBuf {
        self.root.join("cdc")
    }

    pub fn lsn_json(&self) -> PathBuf {
        self.cdc_dir().join("lsn.json")
    }

    pub fn slot_file(&self) -> PathBuf {
        self.cdc_dir().join("slot")
    }

    pub fn origin_file(&self) -> PathBuf {
        self.cdc_dir().join("origin")
    }

    pub fn tli_file(&self) -> PathBuf {
        self.cdc_dir().join("tli")
    }

    pub fn tli_history_file(&self) -> PathBuf {
        self.cdc_dir().join("tli.history")
    }

    pub fn wal_segment_size_file(&self) -> PathBuf {
        self.cdc_dir().join("wal_segment_size")
    }

    pub fn latest_symlink(&self) -> PathBuf {
        self.cdc_dir().join("latest")
    }
}

/// What `inspect` finds on disk before a run decides how to proceed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryState {
    pub exists: bool,
    pub has_schema_json: bool,
    pub has_snapshot: bool,
    pub done_markers: usize,
    /// PID recorded in the main PID file, if any.
    pub recorded_pid: Option<u32>,
}

impl DirectoryState {
    /// A directory is resumable once the catalog snapshot landed.
    pub fn is_resumable(&self) -> bool {
        self.exists && self.has_schema_json
    }
}

#[derive(Debug, Error)]
pub enum WorkDirError {
    #[error("work directory {0} already contains a previous run; use --restart or --resume")]
    PreviousRunFound(PathBuf),
    #[error("cannot resume: {0} has no usable run state")]
    NothingToResume(PathBuf),
    #[error("--restart and --resume are mutually exclusive")]
    RestartAndResume,
    #[error("another pgferry process holds {0}")]
    PidFileHeld(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> WorkDirError {
    WorkDirError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// An initialized work directory, optionally holding a PID-file lock.
///
/// The lock file is held for the life of this value; dropping it releases
/// the advisory lock and removes the PID file.
#[derive(Debug)]
pub struct WorkDir {
    pub paths: Paths,
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    #[allow(dead_code)]
    lock_file: Option<File>,
    lock_path: Option<PathBuf>,
}

impl WorkDir {
    /// Initialize the work directory.
    ///
    /// `restart` removes and recreates everything; `resume` requires a
    /// usable previous state; neither flag with previous state present is
    /// an error so an operator never loses a run by accident.
    pub fn init(
        dir: Option<PathBuf>,
        restart: bool,
        resume: bool,
    ) -> Result<WorkDir, WorkDirError> {
        if restart && resume {
            return Err(WorkDirError::RestartAndResume);
        }
        let paths = Paths::new(dir.unwrap_or_else(Paths::default_root));
        let state = Self::inspect_at(&paths)?;

        if restart && state.exists {
            info!(dir = %paths.root.display(), "restart: removing previous run state");
            std::fs::remove_dir_all(&paths.root).map_err(|e| io_err(&paths.root, e))?;
        } else if resume {
            if !state.is_resumable() {
                return Err(WorkDirError::NothingToResume(paths.root.clone()));
            }
        } else if state.exists && (state.has_schema_json || state.done_markers > 0) {
            return Err(WorkDirError::PreviousRunFound(paths.root.clone()));
        }

        for sub in [
            paths.root.clone(),
            paths.schema_dir(),
            paths.run_dir(),
            paths.cdc_dir(),
        ] {
            std::fs::create_dir_all(&sub).map_err(|e| io_err(&sub, e))?;
        }

        Ok(WorkDir {
            paths,
            lock_file: None,
            lock_path: None,
        })
    }

    /// Inspect a directory without touching it.
    pub fn inspect_at(paths: &Paths) -> Result<DirectoryState, WorkDirError> {
        let root = &paths.root;
        if !root.exists() {
            return Ok(DirectoryState::default());
        }
        let done_markers = match std::fs::read_dir(paths.run_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "done"))
                .count(),
            Err(_) => 0,
        };
        let recorded_pid = std::fs::read_to_string(paths.pid_file())
            .ok()
            .and_then(|s| s.trim().parse().ok());
        Ok(DirectoryState {
            exists: true,
            has_schema_json: paths.schema_json().exists(),
            has_snapshot: paths.snapshot_file().exists(),
            done_markers,
            recorded_pid,
        })
    }

    pub fn inspect(&self) -> Result<DirectoryState, WorkDirError> {
        Self::inspect_at(&self.paths)
    }

    /// Acquire the main PID file. A second concurrent main run fails here.
    pub fn acquire_pid_file(&mut self) -> Result<(), WorkDirError> {
        self.acquire_pid_file_at(self.paths.pid_file())
    }

    /// Acquire an auxiliary service PID file (e.g. the standalone snapshot
    /// holder); coexists with the main PID file.
    pub fn acquire_service_pid_file(&mut self, service: &str) -> Result<(), WorkDirError> {
        self.acquire_pid_file_at(self.paths.service_pid_file(service))
    }

    fn acquire_pid_file_at(&mut self, path: PathBuf) -> Result<(), WorkDirError> {
        // Open without truncating so a failed lock doesn't wipe the
        // running process's PID.
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| WorkDirError::PidFileHeld(path.clone()))?;

        let mut file = file;
        file.set_len(0).map_err(|e| io_err(&path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| io_err(&path, e))?;

        self.lock_file = Some(file);
        self.lock_path = Some(path);
        Ok(())
    }

    /// Remove PID files and the exported snapshot file; progress markers
    /// are never touched here.
    pub fn cleanup(&mut self) {
        if let Some(path) = self.lock_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove PID file");
            }
        }
        self.lock_file = None;
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Check whether a process is still alive (signal 0 probe).
pub fn pid_is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
#[path = "workdir_tests.rs"]
mod tests;
