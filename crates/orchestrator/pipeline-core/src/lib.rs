//! Sequential module dispatch for neuroimaging pipelines.
//!
//! A run takes a project name and an ordered list of modules. The
//! [`Dispatcher`] resolves the project configuration and the
//! subject/session/run [`Selection`], looks every module up in the closed
//! [`ModuleRegistry`], and then invokes the modules one after another. Each
//! invocation gets a fresh working directory from the [`ScratchStager`] that
//! is removed on success and kept on failure, its own module log, a master
//! log transition and one run-summary row. The first failing module halts the
//! run.
//!
//! Processes are started through the [`CommandRunner`] seam so the state
//! machine can be driven without real module scripts.

pub mod dispatcher;
pub mod error;
pub mod invocation;
pub mod registry;
pub mod runner;
pub mod scratch;
pub mod selection;

pub use dispatcher::{DispatchState, Dispatcher, Plan, RunReport, RunRequest};
pub use error::{LogSink, PipelineError, Result};
pub use invocation::{Invocation, InvocationOutcome};
pub use registry::{ArgSlot, Launch, LaunchSettings, ModuleRegistry, ModuleSpec, RegistryError};
pub use runner::{CommandRunner, ExitState, ModuleCommand, OutputSink, ProcessRunner, RunnerError};
pub use scratch::{ScratchDisposition, ScratchStager};
pub use selection::{Dimension, Filter, Selection};
