//! Project configuration types.
//!
//! [`ProjectDocument`] is the raw shape of a project's `dataset.yaml`. Module
//! scripts read the same document, so keys the orchestrator does not know
//! about are carried along in [`ProjectDocument::extra`] instead of being
//! rejected.
//!
//! [`ProjectConfig`] is the validated, resolved form the orchestrator works
//! with. It is built once per run by the loader and never mutated afterwards.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw project document as written by the operator.
///
/// All fields use `#[serde(default)]` so that missing keys surface as
/// precise validation messages rather than opaque deserialization errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectDocument {
    /// Display name of the project. Informational; the directory name wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Dataset root (BIDS directory).
    #[serde(alias = "dataset_dir", skip_serializing_if = "Option::is_none")]
    pub bids_dir: Option<PathBuf>,

    /// Root for processed outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivatives_dir: Option<PathBuf>,

    /// Fast local storage for per-module working directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    /// Where module logs go. Defaults to `<project>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Subjects present in the dataset (description only, never a filter).
    #[serde(deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,

    /// Sessions present in the dataset (description only, never a filter).
    #[serde(deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<String>,

    /// Runs present in the dataset (description only, never a filter).
    #[serde(deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<String>,

    /// Core budget handed to every module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_cpus: Option<u32>,

    /// Memory budget (GB) handed to every module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_gb: Option<u32>,

    /// Per-module overrides keyed by module name or key.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub modules: BTreeMap<String, ModuleOverride>,

    /// Everything else; consumed by the module scripts themselves.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Module-specific settings layered over the project defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOverride {
    /// Arguments forwarded ahead of the command-line extras.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,

    /// Replaces the project core budget for this module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_cpus: Option<u32>,

    /// Replaces the project memory budget for this module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_gb: Option<u32>,

    /// Extra environment variables for the module process.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Concurrency budget passed to a module. The orchestrator never enforces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Budget {
    pub n_cpus: Option<u32>,
    pub mem_gb: Option<u32>,
}

/// Validated project configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// Project identifier (the directory name under the projects root).
    pub project: String,

    /// Path of the document this was loaded from; forwarded to modules.
    pub config_path: PathBuf,

    pub dataset_root: PathBuf,
    pub derivatives_root: PathBuf,
    pub scratch_root: PathBuf,
    pub log_root: PathBuf,

    /// Project-wide budget before module overrides.
    pub budget: Budget,

    /// Module overrides keyed as written in the document.
    pub overrides: BTreeMap<String, ModuleOverride>,

    /// The raw document, kept for display and advisory checks.
    pub document: ProjectDocument,
}

impl ProjectConfig {
    /// Find the override for a module, matching either its key or its name.
    ///
    /// A name match wins when both are present.
    pub fn override_for(&self, key: &str, name: &str) -> Option<&ModuleOverride> {
        self.overrides
            .get(name)
            .or_else(|| self.overrides.get(key))
    }

    /// Effective budget for a module: override values replace project values.
    pub fn budget_for(&self, key: &str, name: &str) -> Budget {
        let mut budget = self.budget;
        if let Some(o) = self.override_for(key, name) {
            if o.n_cpus.is_some() {
                budget.n_cpus = o.n_cpus;
            }
            if o.mem_gb.is_some() {
                budget.mem_gb = o.mem_gb;
            }
        }
        budget
    }

    /// Per-module log file path: `<log_root>/<module name>.log`.
    pub fn module_log_path(&self, module_name: &str) -> PathBuf {
        self.log_root.join(format!("{module_name}.log"))
    }

    /// Directory under the scratch root owned by this project.
    pub fn project_scratch_dir(&self) -> PathBuf {
        self.scratch_root.join(&self.project)
    }
}

/// Subject/session/run tokens are often written as bare numbers in YAML
/// (`sessions: [1, 2]`); accept both and keep them as text.
fn scalar_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    let raw: Option<Vec<Scalar>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|s| match s {
            Scalar::Text(t) => t,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        })
        .collect())
}
