//! The record of one module invocation.
//!
//! A [`PendingInvocation`] accumulates facts while a module runs and is
//! turned into an immutable [`Invocation`] exactly once, when the outcome is
//! known. Nothing edits an [`Invocation`] afterwards.

use crate::runner::ExitState;
use crate::scratch::ScratchDisposition;
use crate::selection::Selection;
use chrono::{DateTime, Utc};
use pipeline_logging::SummaryRecord;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Succeeded,
    Failed { reason: String },
}

impl InvocationOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

/// One finished invocation of one module.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub invocation_id: String,
    pub run_id: String,
    pub module: String,
    pub module_name: String,
    pub selection: Selection,
    /// Everything after the program and launcher flags.
    pub arguments: Vec<String>,
    pub command_line: String,
    pub log_file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u128,
    /// `None` when the process never started.
    pub exit: Option<ExitState>,
    pub outcome: InvocationOutcome,
    pub scratch: ScratchDisposition,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }

    /// The working directory left on disk, if any.
    pub fn work_dir(&self) -> Option<&Path> {
        self.scratch.remaining()
    }

    pub fn to_summary(&self, project: &str) -> SummaryRecord {
        let filter = |f: &crate::selection::Filter| f.tokens().map(<[String]>::to_vec);
        SummaryRecord {
            invocation_id: self.invocation_id.clone(),
            run_id: self.run_id.clone(),
            project: project.to_string(),
            module: self.module.clone(),
            module_name: self.module_name.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            arguments: self.arguments.clone(),
            subjects: filter(&self.selection.subjects),
            sessions: filter(&self.selection.sessions),
            runs: filter(&self.selection.runs),
            success: self.succeeded(),
            exit_code: self.exit.and_then(ExitState::code),
            error: self.outcome.reason().map(str::to_string),
            work_dir: self.work_dir().map(|p| p.display().to_string()),
            log_file: self.log_file.display().to_string(),
        }
    }
}

/// An invocation that has started but not finished.
///
/// Duration comes from the monotonic clock, never from the wall-clock stamps.
pub struct PendingInvocation {
    invocation_id: String,
    run_id: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    module: String,
    module_name: String,
    selection: Selection,
    arguments: Vec<String>,
    command_line: String,
    log_file: PathBuf,
}

impl PendingInvocation {
    pub fn start(
        run_id: &str,
        module: &str,
        module_name: &str,
        selection: &Selection,
        arguments: Vec<String>,
        command_line: String,
        log_file: PathBuf,
    ) -> Self {
        Self {
            invocation_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
            module: module.to_string(),
            module_name: module_name.to_string(),
            selection: selection.clone(),
            arguments,
            command_line,
            log_file,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Stamp the completion time and freeze the record.
    pub fn finalize(
        self,
        exit: Option<ExitState>,
        outcome: InvocationOutcome,
        scratch: ScratchDisposition,
    ) -> Invocation {
        let duration_ms = self.clock.elapsed().as_millis();
        Invocation {
            invocation_id: self.invocation_id,
            run_id: self.run_id,
            module: self.module,
            module_name: self.module_name,
            selection: self.selection,
            arguments: self.arguments,
            command_line: self.command_line,
            log_file: self.log_file,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_ms,
            exit,
            outcome,
            scratch,
        }
    }
}
