//! Logging sinks for the pipeline orchestrator.
//!
//! Three independent destinations:
//! - [`MasterLog`]: one line per module transition, written to whatever
//!   stream the caller hands in
//! - [`ModuleLog`]: the captured output of a single module invocation,
//!   `<log dir>/<module>.log`, recreated on every invocation
//! - [`SummaryWriter`]: the process-wide, append-only JSONL record of every
//!   invocation ever run, safe under concurrent appends from separate runs

use chrono::{DateTime, Utc};

// Re-export chrono types for downstream crates
pub use chrono;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

mod master;
mod module_log;

pub use master::{MasterLog, TransitionStatus};
pub use module_log::ModuleLog;

/// Errors that can occur during logging operations.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Master log write failed: {0}")]
    Master(#[source] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed summary row {line} in {path}: {source}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl LogError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One run-summary row: the durable outcome of a single module invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Unique identifier for this invocation
    pub invocation_id: String,
    /// Identifier shared by every invocation of one orchestrator run
    pub run_id: String,
    pub project: String,
    /// Module key as registered (e.g. "01")
    pub module: String,
    /// Module name (e.g. "mriqc")
    pub module_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u128,
    /// Full argument vector forwarded to the module
    pub arguments: Vec<String>,
    /// Subject filter; `None` means unrestricted
    pub subjects: Option<Vec<String>>,
    /// Session filter; `None` means unrestricted
    pub sessions: Option<Vec<String>>,
    /// Run filter; `None` means unrestricted
    pub runs: Option<Vec<String>>,
    pub success: bool,
    /// Process exit code, when the module exited normally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Why the invocation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Working directory left in place for inspection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Module log file
    pub log_file: String,
}

/// Generate a run identifier.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Appender for the shared run-summary store.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    path: PathBuf,
}

impl SummaryWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line.
    ///
    /// The row is serialized up front and written with one `write_all` while
    /// an exclusive lock is held on the file, so rows from concurrent runs
    /// never interleave.
    pub fn append(&self, record: &SummaryRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LogError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LogError::io(&self.path, e))?;
        let mut lock = RwLock::new(file);
        let mut guard = lock.write().map_err(|e| LogError::io(&self.path, e))?;
        guard
            .write_all(&line)
            .and_then(|()| guard.flush())
            .map_err(|e| LogError::io(&self.path, e))?;
        Ok(())
    }

    /// Read every record in the store. A missing store reads as empty.
    pub fn read_records(&self) -> Result<Vec<SummaryRecord>, LogError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(LogError::io(&self.path, e)),
        };
        raw.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| {
                serde_json::from_str(l).map_err(|source| LogError::MalformedRow {
                    path: self.path.clone(),
                    line: i + 1,
                    source,
                })
            })
            .collect()
    }
}
