use crate::LogError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::io::Write;

/// Outcome reported on a "finished" transition line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionStatus {
    Success,
    Failed { reason: String },
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed { reason } => write!(f, "failure ({reason})"),
        }
    }
}

/// Line-oriented pipeline log written to a caller-provided stream.
///
/// The orchestrator never decides where this goes; the binary hands in
/// stdout and operators redirect it (`nohup pipeline ... > run.log`).
pub struct MasterLog<W: Write> {
    out: W,
}

impl<W: Write> MasterLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn run_started(
        &mut self,
        project: &str,
        run_id: &str,
        modules: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), LogError> {
        self.line(&format!(
            "pipeline run {run_id} for project {project} started at {} (modules: {})",
            stamp(at),
            modules.join(" ")
        ))
    }

    pub fn module_started(
        &mut self,
        key: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LogError> {
        self.line(&format!("module {key} ({name}) started at {}", stamp(at)))
    }

    pub fn module_finished(
        &mut self,
        key: &str,
        name: &str,
        at: DateTime<Utc>,
        status: &TransitionStatus,
    ) -> Result<(), LogError> {
        self.line(&format!(
            "module {key} ({name}) finished at {} with status {status}",
            stamp(at)
        ))
    }

    pub fn run_finished(&mut self, at: DateTime<Utc>, outcome: &str) -> Result<(), LogError> {
        self.line(&format!("pipeline {outcome} at {}", stamp(at)))
    }

    /// Free-form line, e.g. where a failed module's log lives.
    pub fn note(&mut self, text: &str) -> Result<(), LogError> {
        self.line(text)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) -> Result<(), LogError> {
        writeln!(self.out, "{text}")
            .and_then(|()| self.out.flush())
            .map_err(LogError::Master)
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
