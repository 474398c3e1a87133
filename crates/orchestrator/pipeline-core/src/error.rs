use pipeline_config::ConfigError;
use pipeline_logging::LogError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which of the three logging destinations a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Master,
    Module,
    Summary,
}

impl fmt::Display for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Master => "master log",
            Self::Module => "module log",
            Self::Summary => "run summary",
        })
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration file not found at {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration in {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Unknown module: '{requested}' (known modules: {known})")]
    UnknownModule { requested: String, known: String },

    #[error("Scratch directory unavailable under {root}: {source}")]
    ScratchUnavailable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module {module} failed: {reason}")]
    ModuleExecutionFailed { module: String, reason: String },

    #[error("Failed to write {sink}: {source}")]
    LogWriteFailed {
        sink: LogSink,
        #[source]
        source: LogError,
    },

    #[error("Invalid module registry: {0}")]
    Registry(#[from] crate::registry::RegistryError),
}

impl PipelineError {
    /// Errors raised before any module was attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigInvalid { .. }
                | Self::UnknownModule { .. }
                | Self::Registry(_)
        )
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::ConfigNotFound { path },
            ConfigError::Invalid { path, message } => Self::ConfigInvalid { path, message },
            ConfigError::NoHomeDir => Self::ConfigInvalid {
                path: PathBuf::from("~"),
                message: "could not determine home directory".into(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
