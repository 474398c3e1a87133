//! Advisory validation for project configurations.
//!
//! Hard problems (missing roots, unreadable documents) are rejected by the
//! loader. What remains here are warnings: the run proceeds, but the
//! operator gets told about settings that are probably not what they meant.

use crate::types::ProjectConfig;
use std::path::Path;

/// An advisory warning about a configuration issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryWarning {
    /// Machine-readable warning code.
    pub code: &'static str,

    /// Human-readable warning message.
    pub message: String,

    /// Document key the warning refers to.
    pub path: &'static str,
}

impl std::fmt::Display for AdvisoryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

/// Validate a configuration and return advisory warnings.
pub fn validate(cfg: &ProjectConfig) -> Vec<AdvisoryWarning> {
    let mut warnings = vec![];
    let doc = &cfg.document;

    if let Some(name) = &doc.project
        && name != &cfg.project
    {
        warnings.push(AdvisoryWarning {
            code: "project.mismatch",
            path: "project",
            message: format!(
                "document names project '{name}' but it lives in directory '{}'",
                cfg.project
            ),
        });
    }

    validate_budget(cfg.budget.n_cpus, "n_cpus", "n_cpus.zero", &mut warnings);
    validate_budget(cfg.budget.mem_gb, "mem_gb", "mem_gb.zero", &mut warnings);

    for (name, o) in &cfg.overrides {
        if o.n_cpus == Some(0) || o.mem_gb == Some(0) {
            warnings.push(AdvisoryWarning {
                code: "modules.budget.zero",
                path: "modules",
                message: format!("override for '{name}' sets a zero budget"),
            });
        }
    }

    let relative: Vec<&str> = [
        ("bids_dir", doc.bids_dir.as_deref()),
        ("derivatives_dir", doc.derivatives_dir.as_deref()),
        ("scratch_dir", doc.scratch_dir.as_deref()),
        ("log_dir", doc.log_dir.as_deref()),
    ]
    .into_iter()
    .filter_map(|(key, p)| p.filter(|p| is_relative(p)).map(|_| key))
    .collect();
    if !relative.is_empty() {
        warnings.push(AdvisoryWarning {
            code: "paths.relative",
            path: "paths",
            message: format!(
                "relative paths ({}) were resolved against the project directory; \
                 module scripts may resolve them differently",
                relative.join(", ")
            ),
        });
    }

    warnings
}

fn validate_budget(
    value: Option<u32>,
    path: &'static str,
    code: &'static str,
    warnings: &mut Vec<AdvisoryWarning>,
) {
    if value == Some(0) {
        warnings.push(AdvisoryWarning {
            code,
            path,
            message: "budget of zero leaves modules to pick their own defaults".into(),
        });
    }
}

fn is_relative(p: &Path) -> bool {
    p.is_relative() && !p.starts_with("~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Budget, ModuleOverride, ProjectDocument};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config() -> ProjectConfig {
        ProjectConfig {
            project: "demo".into(),
            config_path: PathBuf::from("/p/demo/configs/dataset.yaml"),
            dataset_root: PathBuf::from("/data/bids"),
            derivatives_root: PathBuf::from("/data/derivatives"),
            scratch_root: PathBuf::from("/scratch"),
            log_root: PathBuf::from("/p/demo/logs"),
            budget: Budget {
                n_cpus: Some(8),
                mem_gb: Some(32),
            },
            overrides: BTreeMap::new(),
            document: ProjectDocument {
                bids_dir: Some(PathBuf::from("/data/bids")),
                derivatives_dir: Some(PathBuf::from("/data/derivatives")),
                scratch_dir: Some(PathBuf::from("/scratch")),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_clean_config_has_no_warnings() {
        let warnings = validate(&config());
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_project_name_mismatch_warns() {
        let mut cfg = config();
        cfg.document.project = Some("MemoryLane".into());
        let warnings = validate(&cfg);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "project.mismatch");
    }

    #[test]
    fn test_zero_budget_warns() {
        let mut cfg = config();
        cfg.budget.n_cpus = Some(0);
        cfg.overrides.insert(
            "mriqc".into(),
            ModuleOverride {
                mem_gb: Some(0),
                ..Default::default()
            },
        );
        let codes: Vec<_> = validate(&cfg).into_iter().map(|w| w.code).collect();
        assert!(codes.contains(&"n_cpus.zero"));
        assert!(codes.contains(&"modules.budget.zero"));
        assert!(!codes.contains(&"mem_gb.zero"));
    }

    #[test]
    fn test_relative_paths_warn_once() {
        let mut cfg = config();
        cfg.document.bids_dir = Some(PathBuf::from("bids"));
        cfg.document.log_dir = Some(PathBuf::from("logs"));
        let warnings = validate(&cfg);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("bids_dir, log_dir"));
    }

    #[test]
    fn test_warning_display() {
        let warning = AdvisoryWarning {
            code: "test.code",
            path: "test.path",
            message: "Test message".into(),
        };
        assert_eq!(warning.to_string(), "[test.code] test.path: Test message");
    }
}
