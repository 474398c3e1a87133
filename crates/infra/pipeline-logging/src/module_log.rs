use crate::LogError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Per-module log file: `<log dir>/<module name>.log`.
///
/// Each invocation recreates the file, so it only ever holds the most recent
/// run of that module. Module output is streamed straight into the handle
/// returned by [`ModuleLog::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLog {
    path: PathBuf,
}

impl ModuleLog {
    pub fn new(log_dir: &Path, module_name: &str) -> Self {
        Self {
            path: log_dir.join(format!("{module_name}.log")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log, write `header` and return the handle for the
    /// module's stdout and stderr.
    pub fn create(&self, header: &[String]) -> Result<File, LogError> {
        let io = |e| LogError::Io {
            path: self.path.clone(),
            source: e,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(io)?;
        for line in header {
            writeln!(file, "{line}").map_err(io)?;
        }
        writeln!(file).map_err(io)?;
        file.flush().map_err(io)?;
        Ok(file)
    }

    /// Append a closing line after the module has terminated.
    pub fn append_footer(&self, text: &str) -> Result<(), LogError> {
        let io = |e| LogError::Io {
            path: self.path.clone(),
            source: e,
        };
        let mut file = OpenOptions::new().append(true).open(&self.path).map_err(io)?;
        writeln!(file, "\n{text}").map_err(io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_header_and_returns_writable_handle() {
        let temp = tempfile::tempdir().unwrap();
        let log = ModuleLog::new(temp.path(), "mriqc");
        assert_eq!(log.path(), temp.path().join("mriqc.log"));

        let mut handle = log
            .create(&["Running module mriqc with command: python -m scripts.mriqc".into()])
            .unwrap();
        writeln!(handle, "module output").unwrap();
        drop(handle);
        log.append_footer("Finished with status success").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let header_at = content.find("Running module mriqc").unwrap();
        let output_at = content.find("module output").unwrap();
        let footer_at = content.find("Finished with status success").unwrap();
        assert!(header_at < output_at && output_at < footer_at);
    }

    #[test]
    fn test_create_overwrites_previous_invocation() {
        let temp = tempfile::tempdir().unwrap();
        let log = ModuleLog::new(temp.path(), "fmriprep");

        let mut first = log.create(&["first".into()]).unwrap();
        writeln!(first, "stale output").unwrap();
        drop(first);

        log.create(&["second".into()]).unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("second"));
        assert!(!content.contains("stale output"));
    }

    #[test]
    fn test_create_fails_when_directory_is_a_file() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("logs");
        std::fs::write(&blocker, "not a dir").unwrap();

        let log = ModuleLog::new(&blocker, "mriqc");
        assert!(matches!(log.create(&[]), Err(LogError::Io { .. })));
    }
}
