//! Starting module processes and waiting for them.
//!
//! [`CommandRunner`] is the seam between the dispatcher and the operating
//! system. [`ProcessRunner`] is the real implementation; tests script exits
//! through an in-memory runner instead.

use async_trait::async_trait;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(test)]
pub mod mock;
mod process;

pub use process::ProcessRunner;

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCommand {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl ModuleCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current_dir: None,
            env: vec![],
        }
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs. Not meant to be re-parsed.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Where a module's merged stdout and stderr go.
#[derive(Debug)]
pub enum OutputSink {
    File(File),
    /// The module log could not be opened; output is dropped.
    Discard,
}

/// How a module process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    /// Killed by a signal it did not handle.
    Signaled(i32),
    /// Terminated by the orchestrator because it was asked to shut down.
    Interrupted,
}

impl ExitState {
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) | Self::Interrupted => None,
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(sig) => write!(f, "killed by signal {sig}"),
            Self::Interrupted => f.write_str("interrupted by operator"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to attach module output: {0}")]
    Output(#[source] std::io::Error),
}

/// Runs one module process to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Start `command` with stdout and stderr sent to `output`, and wait for
    /// it to end.
    async fn run(&self, command: &ModuleCommand, output: OutputSink)
    -> Result<ExitState, RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_quotes_only_when_needed() {
        let cmd = ModuleCommand::new(
            "python",
            vec!["-m".into(), "scripts.mriqc".into(), "--label".into(), "two words".into(), String::new()],
        );
        assert_eq!(
            cmd.command_line(),
            "python -m scripts.mriqc --label 'two words' ''"
        );
    }

    #[test]
    fn exit_state_reporting() {
        assert!(ExitState::Exited(0).success());
        assert!(!ExitState::Exited(3).success());
        assert_eq!(ExitState::Exited(3).code(), Some(3));
        assert_eq!(ExitState::Signaled(9).code(), None);
        assert_eq!(ExitState::Signaled(9).to_string(), "killed by signal 9");
        assert!(!ExitState::Interrupted.success());
    }
}
