//! Closed registry of processing modules.
//!
//! The table is fixed by the deployment and validated once at startup. A
//! module script honours one contract: accept `-c <config>`, optional
//! `-s`/`-n`/`-r` token lists, trailing free-form arguments, and exit zero on
//! success.

use crate::error::{PipelineError, Result};
use crate::runner::ModuleCommand;
use crate::selection::{Dimension, Selection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An argument slot a module script declares it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSlot {
    Config,
    Subjects,
    Sessions,
    Runs,
}

impl ArgSlot {
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Config => "-c",
            Self::Subjects => "-s",
            Self::Sessions => "-n",
            Self::Runs => "-r",
        }
    }

    pub const fn required(self) -> bool {
        matches!(self, Self::Config)
    }

    const fn dimension(self) -> Option<Dimension> {
        match self {
            Self::Config => None,
            Self::Subjects => Some(Dimension::Subjects),
            Self::Sessions => Some(Dimension::Sessions),
            Self::Runs => Some(Dimension::Runs),
        }
    }
}

/// The argument contract every built-in module honours.
pub const STANDARD_CONTRACT: [ArgSlot; 4] = [
    ArgSlot::Config,
    ArgSlot::Subjects,
    ArgSlot::Sessions,
    ArgSlot::Runs,
];

/// How a module process is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// `<python> -u -m <module path>`, run from the modules root.
    PythonModule(String),
    /// A standalone executable; relative paths resolve against the modules root.
    Executable(PathBuf),
}

/// Where module scripts live and what runs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub modules_root: PathBuf,
    pub python: String,
}

impl LaunchSettings {
    pub fn new(modules_root: impl Into<PathBuf>) -> Self {
        Self {
            modules_root: modules_root.into(),
            python: "python".into(),
        }
    }

    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    /// Stable key, e.g. "01".
    pub key: String,
    /// Symbolic name, e.g. "mriqc". Also names the module log.
    pub name: String,
    pub launch: Launch,
    pub slots: Vec<ArgSlot>,
}

impl ModuleSpec {
    /// A Python module under `scripts/`, launched with the standard contract.
    pub fn python(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            launch: Launch::PythonModule(format!("scripts.{name}")),
            slots: STANDARD_CONTRACT.to_vec(),
        }
    }

    pub fn executable(key: &str, name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            launch: Launch::Executable(path.into()),
            slots: STANDARD_CONTRACT.to_vec(),
        }
    }

    #[must_use]
    pub fn with_slots(mut self, slots: &[ArgSlot]) -> Self {
        self.slots = slots.to_vec();
        self
    }

    /// Arguments forwarded to the module, in contract order.
    ///
    /// Unrestricted dimensions produce no flag at all; an empty-but-present
    /// flag could read as "process nothing".
    pub fn arguments(&self, config: &Path, selection: &Selection, extra: &[String]) -> Vec<String> {
        let mut args = vec![];
        for slot in &self.slots {
            match slot.dimension() {
                None => {
                    args.push(slot.flag().to_string());
                    args.push(config.display().to_string());
                }
                Some(dim) => {
                    if let Some(tokens) = selection.get(dim).tokens() {
                        args.push(slot.flag().to_string());
                        args.extend(tokens.iter().cloned());
                    }
                }
            }
        }
        args.extend(extra.iter().cloned());
        args
    }

    /// The process to start for this module with the given arguments.
    pub fn command(&self, launch: &LaunchSettings, arguments: Vec<String>) -> ModuleCommand {
        match &self.launch {
            Launch::PythonModule(module) => {
                let mut args = vec!["-u".to_string(), "-m".to_string(), module.clone()];
                args.extend(arguments);
                ModuleCommand::new(&launch.python, args).current_dir(&launch.modules_root)
            }
            Launch::Executable(path) => {
                let program = if path.is_absolute() {
                    path.clone()
                } else {
                    launch.modules_root.join(path)
                };
                ModuleCommand::new(program.display().to_string(), arguments)
                    .current_dir(&launch.modules_root)
            }
        }
    }

    fn matches(&self, requested: &str) -> bool {
        self.key == requested || self.name == requested
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module key and name must be non-empty")]
    EmptyIdentifier,
    #[error("duplicate module identifier '{0}'")]
    Duplicate(String),
    #[error("module '{0}' does not declare the required config slot")]
    MissingConfigSlot(String),
    #[error("module '{0}' declares an argument slot twice")]
    RepeatedSlot(String),
}

/// Static mapping from module identifier to [`ModuleSpec`].
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    specs: Vec<ModuleSpec>,
}

impl ModuleRegistry {
    /// Build a registry, rejecting ambiguous or contract-breaking entries.
    pub fn new(specs: Vec<ModuleSpec>) -> std::result::Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.key.trim().is_empty() || spec.name.trim().is_empty() {
                return Err(RegistryError::EmptyIdentifier);
            }
            for ident in [&spec.key, &spec.name] {
                if !seen.insert(ident.clone()) {
                    return Err(RegistryError::Duplicate(ident.clone()));
                }
            }
            if !spec.slots.iter().any(|s| s.required()) {
                return Err(RegistryError::MissingConfigSlot(spec.name.clone()));
            }
            let unique: HashSet<_> = spec.slots.iter().collect();
            if unique.len() != spec.slots.len() {
                return Err(RegistryError::RepeatedSlot(spec.name.clone()));
            }
        }
        Ok(Self { specs })
    }

    /// The deployment's module table.
    pub fn builtin() -> std::result::Result<Self, RegistryError> {
        Self::new(vec![
            ModuleSpec::python("01", "mriqc"),
            ModuleSpec::python("02", "fmriprep"),
            ModuleSpec::python("03", "mriqc_group"),
            ModuleSpec::python("04", "freesurfer"),
        ])
    }

    pub fn specs(&self) -> &[ModuleSpec] {
        &self.specs
    }

    /// Look a module up by key or name.
    pub fn lookup(&self, requested: &str) -> Result<&ModuleSpec> {
        let requested = requested.trim();
        self.specs
            .iter()
            .find(|s| s.matches(requested))
            .ok_or_else(|| PipelineError::UnknownModule {
                requested: requested.to_string(),
                known: self.known(),
            })
    }

    /// Resolve a whole request up front, preserving order and repeats.
    pub fn resolve_all(&self, requested: &[String]) -> Result<Vec<ModuleSpec>> {
        requested
            .iter()
            .map(|r| self.lookup(r).cloned())
            .collect()
    }

    /// Whether any module answers to `ident`.
    pub fn knows(&self, ident: &str) -> bool {
        self.specs.iter().any(|s| s.matches(ident))
    }

    fn known(&self) -> String {
        self.specs
            .iter()
            .map(|s| format!("{} ({})", s.key, s.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
