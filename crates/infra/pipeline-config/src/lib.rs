//! Project configuration for the pipeline orchestrator.
//!
//! This crate provides:
//! - [`PipelinePaths`]: process-wide locations (projects root, run-summary store)
//! - [`ConfigResolver`]: loads `<projects>/<project>/configs/dataset.yaml`
//!   into a validated [`ProjectConfig`]
//! - [`validation`]: advisory checks that produce warnings, never errors
//!
//! # Example
//! ```no_run
//! use pipeline_config::{ConfigResolver, PipelinePaths};
//!
//! let resolver = ConfigResolver::new(PipelinePaths::from_home().unwrap());
//! let loaded = resolver.resolve("MemoryLane").unwrap();
//! println!("Dataset root: {}", loaded.config.dataset_root.display());
//!
//! for warning in &loaded.warnings {
//!     eprintln!("Warning: {warning}");
//! }
//! ```

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{ConfigError, ConfigResolver, LoadedProject, PipelinePaths};
pub use types::{Budget, ModuleOverride, ProjectConfig, ProjectDocument};
pub use validation::AdvisoryWarning;
