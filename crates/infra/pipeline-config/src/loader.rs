//! Project configuration loader.
//!
//! The loading process:
//! 1. Locate `<projects_dir>/<project>/configs/dataset.yaml` (or `.yml`)
//! 2. Parse it into a [`ProjectDocument`]
//! 3. Check required paths and turn them into a [`ProjectConfig`]
//! 4. Create the project log directory if absent
//! 5. Run advisory validation

use crate::types::{Budget, ProjectConfig, ProjectDocument};
use crate::validation::AdvisoryWarning;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory under the home directory holding every project.
pub const PROJECTS_DIR: &str = "projects";

/// Directory inside a project holding its configuration.
pub const CONFIGS_DIR: &str = "configs";

/// Filename for the project document.
pub const CONFIG_FILE: &str = "dataset.yaml";

/// Alternate spelling accepted when [`CONFIG_FILE`] is absent.
pub const CONFIG_FILE_ALT: &str = "dataset.yml";

/// Default log directory name inside a project.
pub const LOGS_DIR: &str = "logs";

/// Filename of the run-summary store under the projects directory.
pub const SUMMARY_FILE: &str = "pipeline_summary.jsonl";

/// Errors raised while resolving a project configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid configuration in {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Process-wide locations shared by every project.
///
/// Built once at startup and handed to the components that need it; nothing
/// below this type looks at the environment or the home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    /// Root directory containing one directory per project.
    pub projects_dir: PathBuf,

    /// Append-only run-summary store shared by all projects.
    pub summary_path: PathBuf,
}

impl PipelinePaths {
    /// Paths rooted at `projects_dir`, with the summary store inside it.
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        let projects_dir = projects_dir.into();
        let summary_path = projects_dir.join(SUMMARY_FILE);
        Self {
            projects_dir,
            summary_path,
        }
    }

    /// Default layout: `~/projects`.
    pub fn from_home() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(home.join(PROJECTS_DIR)))
    }

    /// Replace the summary store location.
    #[must_use]
    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = path.into();
        self
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_dir.join(project)
    }

    /// Preferred location of a project's document.
    pub fn config_path(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(CONFIGS_DIR).join(CONFIG_FILE)
    }

    fn config_candidates(&self, project: &str) -> [PathBuf; 2] {
        let dir = self.project_dir(project).join(CONFIGS_DIR);
        [dir.join(CONFIG_FILE), dir.join(CONFIG_FILE_ALT)]
    }
}

/// Result of resolving a project.
#[derive(Debug)]
pub struct LoadedProject {
    /// The validated configuration.
    pub config: ProjectConfig,

    /// Advisory warnings; never fatal.
    pub warnings: Vec<AdvisoryWarning>,
}

/// Resolves a project name into a validated [`ProjectConfig`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    paths: PipelinePaths,
}

impl ConfigResolver {
    pub fn new(paths: PipelinePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    /// Load, validate and resolve the configuration for `project`.
    ///
    /// Creates the project log directory when it does not exist yet. Failure
    /// to create it is reported as a warning: module logs are best-effort.
    pub fn resolve(&self, project: &str) -> Result<LoadedProject, ConfigError> {
        let preferred = self.paths.config_path(project);
        validate_project_name(project).map_err(|message| ConfigError::Invalid {
            path: preferred.clone(),
            message,
        })?;

        let config_path = self
            .paths
            .config_candidates(project)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or(ConfigError::NotFound { path: preferred })?;

        tracing::debug!("Using config file {}", config_path.display());
        let document = read_document(&config_path)?;
        let project_dir = self.paths.project_dir(project);
        let config = build_config(project, &project_dir, config_path, document)?;

        let mut warnings = crate::validation::validate(&config);
        if let Err(e) = std::fs::create_dir_all(&config.log_root) {
            warnings.push(AdvisoryWarning {
                code: "log_dir.unavailable",
                path: "log_dir",
                message: format!(
                    "Could not create log directory {}: {e}",
                    config.log_root.display()
                ),
            });
        }

        Ok(LoadedProject { config, warnings })
    }
}

/// Project names become path components; keep them to a single one.
fn validate_project_name(project: &str) -> Result<(), String> {
    let trimmed = project.trim();
    if trimmed.is_empty() {
        return Err("project name cannot be empty".into());
    }
    if trimmed != project {
        return Err(format!(
            "project name '{project}' has leading or trailing whitespace"
        ));
    }
    if project == "." || project == ".." || project.contains(['/', '\\']) {
        return Err(format!(
            "project name '{project}' must be a single directory name"
        ));
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<ProjectDocument, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        path: path.to_path_buf(),
        message,
    };

    let raw = std::fs::read_to_string(path).map_err(|e| invalid(format!("unreadable: {e}")))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|e| invalid(format!("invalid YAML: {e}")))?;

    match value {
        serde_yaml::Value::Mapping(_) => {}
        serde_yaml::Value::Null => return Err(invalid("document is empty".into())),
        _ => return Err(invalid("document root must be a mapping".into())),
    }

    serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))
}

fn build_config(
    project: &str,
    project_dir: &Path,
    config_path: PathBuf,
    document: ProjectDocument,
) -> Result<ProjectConfig, ConfigError> {
    let mut problems = vec![];

    let dataset_root = required_dir(
        document.bids_dir.as_deref(),
        "bids_dir",
        project_dir,
        &mut problems,
    );
    let derivatives_root = required_dir(
        document.derivatives_dir.as_deref(),
        "derivatives_dir",
        project_dir,
        &mut problems,
    );
    let scratch_root = required_dir(
        document.scratch_dir.as_deref(),
        "scratch_dir",
        project_dir,
        &mut problems,
    );

    let log_root = document.log_dir.as_deref().map_or_else(
        || project_dir.join(LOGS_DIR),
        |p| resolve_path(p, project_dir),
    );
    if log_root.exists() && !log_root.is_dir() {
        problems.push(format!(
            "log_dir {} exists but is not a directory",
            log_root.display()
        ));
    }

    let (Some(dataset_root), Some(derivatives_root), Some(scratch_root)) =
        (dataset_root, derivatives_root, scratch_root)
    else {
        return Err(ConfigError::Invalid {
            path: config_path,
            message: problems.join("; "),
        });
    };
    if !problems.is_empty() {
        return Err(ConfigError::Invalid {
            path: config_path,
            message: problems.join("; "),
        });
    }

    Ok(ProjectConfig {
        project: project.to_string(),
        config_path,
        dataset_root,
        derivatives_root,
        scratch_root,
        log_root,
        budget: Budget {
            n_cpus: document.n_cpus,
            mem_gb: document.mem_gb,
        },
        overrides: document.modules.clone(),
        document,
    })
}

/// Resolve a required directory field, collecting a message when it is
/// missing or does not point at an existing directory.
fn required_dir(
    value: Option<&Path>,
    field: &str,
    project_dir: &Path,
    problems: &mut Vec<String>,
) -> Option<PathBuf> {
    let Some(raw) = value else {
        problems.push(format!("missing required field '{field}'"));
        return None;
    };
    if raw.as_os_str().is_empty() {
        problems.push(format!("field '{field}' is empty"));
        return None;
    }
    let path = resolve_path(raw, project_dir);
    if !path.is_dir() {
        problems.push(format!(
            "{field} {} does not exist or is not a directory",
            path.display()
        ));
        return None;
    }
    Some(path)
}

/// Expand `~/` and anchor relative paths at the project directory.
fn resolve_path(raw: &Path, project_dir: &Path) -> PathBuf {
    let expanded = expand_tilde(raw);
    if expanded.is_absolute() {
        expanded
    } else {
        project_dir.join(expanded)
    }
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        paths: PipelinePaths,
        data: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        for d in ["bids", "derivatives", "scratch"] {
            std::fs::create_dir_all(data.join(d)).unwrap();
        }
        let paths = PipelinePaths::new(temp.path().join("projects"));
        Fixture {
            _temp: temp,
            paths,
            data,
        }
    }

    fn write_config(paths: &PipelinePaths, project: &str, file: &str, body: &str) -> PathBuf {
        let dir = paths.project_dir(project).join(CONFIGS_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn valid_body(data: &Path) -> String {
        format!(
            "project: demo\nbids_dir: {}\nderivatives_dir: {}\nscratch_dir: {}\nn_cpus: 8\nmem_gb: 32\n",
            data.join("bids").display(),
            data.join("derivatives").display(),
            data.join("scratch").display(),
        )
    }

    #[test]
    fn test_paths_default_layout() {
        let paths = PipelinePaths::new("/home/op/projects");
        assert_eq!(
            paths.summary_path,
            PathBuf::from("/home/op/projects/pipeline_summary.jsonl")
        );
        assert_eq!(
            paths.config_path("demo"),
            PathBuf::from("/home/op/projects/demo/configs/dataset.yaml")
        );

        let moved = paths.with_summary_path("/var/log/summary.jsonl");
        assert_eq!(moved.summary_path, PathBuf::from("/var/log/summary.jsonl"));
    }

    #[test]
    fn test_missing_document_is_not_found() {
        let fx = fixture();
        let err = ConfigResolver::new(fx.paths.clone())
            .resolve("demo")
            .unwrap_err();
        match err {
            ConfigError::NotFound { path } => {
                assert_eq!(path, fx.paths.config_path("demo"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        // Nothing created as a side effect
        assert!(!fx.paths.project_dir("demo").exists());
    }

    #[test]
    fn test_resolves_valid_document_and_creates_log_dir() {
        let fx = fixture();
        let path = write_config(&fx.paths, "demo", CONFIG_FILE, &valid_body(&fx.data));

        let loaded = ConfigResolver::new(fx.paths.clone())
            .resolve("demo")
            .unwrap();
        let cfg = loaded.config;

        assert_eq!(cfg.project, "demo");
        assert_eq!(cfg.config_path, path);
        assert_eq!(cfg.dataset_root, fx.data.join("bids"));
        assert_eq!(cfg.scratch_root, fx.data.join("scratch"));
        assert_eq!(cfg.log_root, fx.paths.project_dir("demo").join(LOGS_DIR));
        assert!(cfg.log_root.is_dir());
        assert_eq!(cfg.budget.n_cpus, Some(8));
        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    }

    #[test]
    fn test_log_dir_creation_is_idempotent() {
        let fx = fixture();
        write_config(&fx.paths, "demo", CONFIG_FILE, &valid_body(&fx.data));
        let resolver = ConfigResolver::new(fx.paths.clone());
        resolver.resolve("demo").unwrap();
        let again = resolver.resolve("demo").unwrap();
        assert!(again.config.log_root.is_dir());
    }

    #[test]
    fn test_yml_fallback() {
        let fx = fixture();
        let path = write_config(&fx.paths, "demo", CONFIG_FILE_ALT, &valid_body(&fx.data));
        let loaded = ConfigResolver::new(fx.paths).resolve("demo").unwrap();
        assert_eq!(loaded.config.config_path, path);
    }

    #[test]
    fn test_missing_required_fields_listed() {
        let fx = fixture();
        write_config(
            &fx.paths,
            "demo",
            CONFIG_FILE,
            &format!("bids_dir: {}\n", fx.data.join("bids").display()),
        );
        let err = ConfigResolver::new(fx.paths).resolve("demo").unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(msg.contains("derivatives_dir"), "{msg}");
        assert!(msg.contains("scratch_dir"), "{msg}");
        assert!(!msg.contains("'bids_dir'"), "{msg}");
    }

    #[test]
    fn test_nonexistent_dataset_root_is_invalid() {
        let fx = fixture();
        let body = valid_body(&fx.data).replace("/bids", "/missing-bids");
        write_config(&fx.paths, "demo", CONFIG_FILE, &body);
        let err = ConfigResolver::new(fx.paths).resolve("demo").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("missing-bids"));
    }

    #[test]
    fn test_invalid_yaml_errors() {
        let fx = fixture();
        write_config(&fx.paths, "demo", CONFIG_FILE, "bids_dir: [unclosed\n");
        let err = ConfigResolver::new(fx.paths).resolve("demo").unwrap_err();
        assert!(err.to_string().contains("invalid YAML"));
    }

    #[test]
    fn test_non_mapping_root_errors() {
        let fx = fixture();
        write_config(&fx.paths, "demo", CONFIG_FILE, "- a\n- b\n");
        let err = ConfigResolver::new(fx.paths).resolve("demo").unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));
    }

    #[test]
    fn test_rejects_path_like_project_names() {
        let fx = fixture();
        let resolver = ConfigResolver::new(fx.paths);
        for bad in ["", "..", "a/b", " demo"] {
            let err = resolver.resolve(bad).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{bad:?}");
        }
    }

    #[test]
    fn test_relative_paths_anchor_at_project_dir() {
        let fx = fixture();
        let project_dir = fx.paths.project_dir("demo");
        for d in ["bids", "derivatives", "scratch"] {
            std::fs::create_dir_all(project_dir.join(d)).unwrap();
        }
        write_config(
            &fx.paths,
            "demo",
            CONFIG_FILE,
            "bids_dir: bids\nderivatives_dir: derivatives\nscratch_dir: scratch\nlog_dir: custom-logs\n",
        );
        let loaded = ConfigResolver::new(fx.paths.clone())
            .resolve("demo")
            .unwrap();
        assert_eq!(loaded.config.dataset_root, project_dir.join("bids"));
        assert_eq!(loaded.config.log_root, project_dir.join("custom-logs"));
        assert!(
            loaded
                .warnings
                .iter()
                .any(|w| w.code == "paths.relative")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/data"));
        assert!(!expanded.to_string_lossy().starts_with('~'));

        let plain = expand_tilde(Path::new("/absolute/path"));
        assert_eq!(plain, PathBuf::from("/absolute/path"));
    }
}
