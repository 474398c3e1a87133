//! Per-invocation working directories on fast local storage.
//!
//! Every invocation gets a fresh directory. It is removed after success and
//! kept after failure, with a small marker file recording which invocation
//! left it behind.

use crate::error::{PipelineError, Result};
use atomicwrites::{AllowOverwrite, AtomicFile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the marker written into a preserved working directory.
pub const MARKER_FILE: &str = ".pipeline-invocation.json";

const STAGE_ATTEMPTS: usize = 8;

/// A working directory staged for one invocation.
#[derive(Debug, PartialEq, Eq)]
pub struct StagedDir {
    path: PathBuf,
}

impl StagedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What became of an invocation's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScratchDisposition {
    /// Never created (staging failed or the run was planned only).
    NotStaged,
    Removed,
    /// Kept for inspection. `marker` is absent when it could not be written.
    Preserved { path: PathBuf, marker: Option<PathBuf> },
    /// Cleanup after success failed; the directory may be partially left.
    RemovalFailed { path: PathBuf, message: String },
}

impl ScratchDisposition {
    /// The directory left on disk, if any.
    pub fn remaining(&self) -> Option<&Path> {
        match self {
            Self::Preserved { path, .. } | Self::RemovalFailed { path, .. } => Some(path),
            Self::NotStaged | Self::Removed => None,
        }
    }
}

/// Contents of [`MARKER_FILE`].
#[derive(Debug, Clone, Serialize)]
pub struct PreservedMarker {
    pub invocation_id: String,
    pub run_id: String,
    pub project: String,
    pub module: String,
    pub module_name: String,
    pub started_at: DateTime<Utc>,
    pub command_line: String,
    pub reason: String,
    pub log_file: PathBuf,
}

/// Creates and disposes of working directories under
/// `<scratch root>/<project>/<module name>/`.
#[derive(Debug, Clone)]
pub struct ScratchStager {
    base: PathBuf,
}

impl ScratchStager {
    pub fn new(scratch_root: &Path, project: &str) -> Self {
        Self {
            base: scratch_root.join(project),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create a fresh, empty directory for one invocation of `module_name`.
    ///
    /// The leaf is created with `create_dir`, never `create_dir_all`, so an
    /// existing directory is never reused.
    pub fn stage(&self, module_name: &str) -> Result<StagedDir> {
        let parent = self.base.join(module_name);
        std::fs::create_dir_all(&parent).map_err(|source| PipelineError::ScratchUnavailable {
            root: parent.clone(),
            source,
        })?;

        let mut last = None;
        for _ in 0..STAGE_ATTEMPTS {
            let path = parent.join(leaf_name(Utc::now()));
            #[expect(
                clippy::create_dir,
                reason = "the leaf must not already exist; reuse would mix invocations"
            )]
            let created = std::fs::create_dir(&path);
            match created {
                Ok(()) => {
                    debug!("Staged working directory {}", path.display());
                    return Ok(StagedDir { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last = Some(e),
                Err(source) => {
                    return Err(PipelineError::ScratchUnavailable {
                        root: parent,
                        source,
                    });
                }
            }
        }
        Err(PipelineError::ScratchUnavailable {
            root: parent,
            source: last.unwrap_or_else(|| ErrorKind::AlreadyExists.into()),
        })
    }

    /// Remove a directory after a successful invocation.
    pub fn release(&self, dir: StagedDir) -> ScratchDisposition {
        match std::fs::remove_dir_all(&dir.path) {
            Ok(()) => ScratchDisposition::Removed,
            Err(e) => {
                warn!(
                    "Failed to remove working directory {}: {e}",
                    dir.path.display()
                );
                ScratchDisposition::RemovalFailed {
                    path: dir.path,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Keep a directory after a failed invocation and write its marker.
    pub fn preserve(&self, dir: StagedDir, marker: &PreservedMarker) -> ScratchDisposition {
        let target = dir.path.join(MARKER_FILE);
        let written = serde_json::to_vec_pretty(marker)
            .map_err(std::io::Error::from)
            .and_then(|json| {
                AtomicFile::new(&target, AllowOverwrite)
                    .write(|f| f.write_all(&json))
                    .map_err(|e| match e {
                        atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => e,
                    })
            });
        let marker = match written {
            Ok(()) => Some(target),
            Err(e) => {
                warn!("Failed to write marker {}: {e}", target.display());
                None
            }
        };
        ScratchDisposition::Preserved {
            path: dir.path,
            marker,
        }
    }
}

fn leaf_name(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.format("%Y%m%dT%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> PreservedMarker {
        PreservedMarker {
            invocation_id: "inv-1".into(),
            run_id: "run-1".into(),
            project: "demo".into(),
            module: "02".into(),
            module_name: "fmriprep".into(),
            started_at: Utc::now(),
            command_line: "python -u -m scripts.fmriprep -c /cfg.yaml".into(),
            reason: "exit code 1".into(),
            log_file: PathBuf::from("/p/demo/logs/fmriprep.log"),
        }
    }

    #[test]
    fn stage_creates_empty_dir_under_project_and_module() {
        let temp = tempfile::tempdir().unwrap();
        let stager = ScratchStager::new(temp.path(), "demo");

        let dir = stager.stage("mriqc").unwrap();
        assert!(dir.path().is_dir());
        assert!(dir.path().starts_with(temp.path().join("demo").join("mriqc")));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn repeated_stage_never_reuses_a_directory() {
        let temp = tempfile::tempdir().unwrap();
        let stager = ScratchStager::new(temp.path(), "demo");

        let first = stager.stage("mriqc").unwrap();
        let second = stager.stage("mriqc").unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn release_removes_directory_and_contents() {
        let temp = tempfile::tempdir().unwrap();
        let stager = ScratchStager::new(temp.path(), "demo");
        let dir = stager.stage("mriqc").unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("intermediate.nii"), b"data").unwrap();

        assert_eq!(stager.release(dir), ScratchDisposition::Removed);
        assert!(!path.exists());
    }

    #[test]
    fn preserve_keeps_directory_and_writes_marker() {
        let temp = tempfile::tempdir().unwrap();
        let stager = ScratchStager::new(temp.path(), "demo");
        let dir = stager.stage("fmriprep").unwrap();
        let path = dir.path().to_path_buf();

        let disposition = stager.preserve(dir, &marker());
        assert_eq!(disposition.remaining(), Some(path.as_path()));
        match disposition {
            ScratchDisposition::Preserved { marker: Some(m), .. } => {
                let raw = std::fs::read_to_string(m).unwrap();
                let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
                assert_eq!(json["invocation_id"], "inv-1");
                assert_eq!(json["reason"], "exit code 1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stage_fails_when_root_is_a_file() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("scratch");
        std::fs::write(&blocker, b"").unwrap();

        let stager = ScratchStager::new(&blocker, "demo");
        let err = stager.stage("mriqc").unwrap_err();
        assert!(matches!(err, PipelineError::ScratchUnavailable { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn leaf_name_is_timestamp_and_suffix() {
        let at = DateTime::parse_from_rfc3339("2025-10-06T09:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = leaf_name(at);
        assert!(name.starts_with("20251006T093005-"));
        assert_eq!(name.len(), "20251006T093005-".len() + 8);
    }
}
