//! The top-level control loop.
//!
//! One run resolves configuration, selection and modules up front, then
//! invokes each module strictly in order, one at a time. The first failure
//! halts the run; modules after it are never attempted and get no summary row.

use crate::error::{LogSink, PipelineError, Result};
use crate::invocation::{Invocation, InvocationOutcome, PendingInvocation};
use crate::registry::{LaunchSettings, ModuleRegistry, ModuleSpec};
use crate::runner::{CommandRunner, ModuleCommand, OutputSink};
use crate::scratch::{PreservedMarker, ScratchDisposition, ScratchStager};
use crate::selection::Selection;
use chrono::{SecondsFormat, Utc};
use pipeline_config::{AdvisoryWarning, ConfigResolver, ProjectConfig};
use pipeline_logging::{LogError, MasterLog, ModuleLog, SummaryWriter, TransitionStatus};
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub project: String,
    /// Module keys or names, in execution order. Repeats run repeatedly.
    pub modules: Vec<String>,
    pub subjects: Option<Vec<String>>,
    pub sessions: Option<Vec<String>>,
    pub runs: Option<Vec<String>>,
    /// Forwarded verbatim after the standard arguments.
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Resolving,
    Running { index: usize, module: String },
    Completed,
    /// `module` is `None` when the run failed before any module started.
    Failed { module: Option<String> },
}

/// Everything resolved before the first module starts.
#[derive(Debug, Clone)]
pub struct Plan {
    pub config: ProjectConfig,
    pub selection: Selection,
    pub modules: Vec<ModuleSpec>,
    pub extra_args: Vec<String>,
    pub warnings: Vec<AdvisoryWarning>,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub project: String,
    pub state: DispatchState,
    /// One entry per attempted module, in order.
    pub invocations: Vec<Invocation>,
    /// Why the run stopped early, if it did.
    pub halted_by: Option<PipelineError>,
    /// Sink failures. None of them changed a module's outcome.
    pub log_failures: Vec<PipelineError>,
    pub warnings: Vec<AdvisoryWarning>,
}

impl RunReport {
    pub fn completed(&self) -> bool {
        self.state == DispatchState::Completed
    }

    pub fn failed_invocation(&self) -> Option<&Invocation> {
        self.invocations.iter().find(|i| !i.succeeded())
    }
}

/// Sequences module invocations for one project at a time.
pub struct Dispatcher<R, W: Write> {
    resolver: ConfigResolver,
    registry: ModuleRegistry,
    launch: LaunchSettings,
    runner: R,
    master: MasterLog<W>,
    summary: SummaryWriter,
    shutdown: CancellationToken,
    state: DispatchState,
    run_id: String,
    log_failures: Vec<PipelineError>,
}

impl<R: CommandRunner, W: Write> Dispatcher<R, W> {
    pub fn new(
        resolver: ConfigResolver,
        registry: ModuleRegistry,
        launch: LaunchSettings,
        runner: R,
        master: W,
    ) -> Self {
        let summary = SummaryWriter::new(&resolver.paths().summary_path);
        Self {
            resolver,
            registry,
            launch,
            runner,
            master: MasterLog::new(master),
            summary,
            shutdown: CancellationToken::new(),
            state: DispatchState::Idle,
            run_id: pipeline_logging::new_run_id(),
            log_failures: vec![],
        }
    }

    /// Stop starting new modules once `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn into_master(self) -> W {
        self.master.into_inner()
    }

    /// Resolve configuration, then selection, then modules.
    ///
    /// Every error here is fatal and nothing has been staged or recorded.
    pub fn plan(&mut self, request: &RunRequest) -> Result<Plan> {
        self.state = DispatchState::Resolving;
        let planned = self.resolve(request);
        if planned.is_err() {
            self.state = DispatchState::Failed { module: None };
        }
        planned
    }

    fn resolve(&self, request: &RunRequest) -> Result<Plan> {
        let loaded = self.resolver.resolve(&request.project)?;
        let selection = Selection::resolve(
            request.subjects.clone(),
            request.sessions.clone(),
            request.runs.clone(),
        );
        let modules = self.registry.resolve_all(&request.modules)?;

        let mut warnings = loaded.warnings;
        let unknown: Vec<_> = loaded
            .config
            .overrides
            .keys()
            .filter(|k| !self.registry.knows(k))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            warnings.push(AdvisoryWarning {
                code: "modules.unknown",
                path: "modules",
                message: format!("overrides for unknown modules: {}", unknown.join(", ")),
            });
        }

        Ok(Plan {
            config: loaded.config,
            selection,
            modules,
            extra_args: request.extra_args.clone(),
            warnings,
        })
    }

    /// The command a module would be started with, minus its working
    /// directory. Returns the forwarded arguments alongside.
    pub fn command_for(&self, plan: &Plan, spec: &ModuleSpec) -> (Vec<String>, ModuleCommand) {
        let config = &plan.config;
        let module_override = config.override_for(&spec.key, &spec.name);

        let mut extras = module_override
            .map(|o| o.extra_args.clone())
            .unwrap_or_default();
        extras.extend(plan.extra_args.iter().cloned());
        let arguments = spec.arguments(&config.config_path, &plan.selection, &extras);

        let mut command = spec
            .command(&self.launch, arguments.clone())
            .env("PIPELINE_PROJECT", &config.project)
            .env("PIPELINE_MODULE", &spec.name)
            .env("PIPELINE_RUN_ID", &self.run_id);
        let budget = config.budget_for(&spec.key, &spec.name);
        if let Some(n) = budget.n_cpus {
            command = command.env("PIPELINE_N_CPUS", n.to_string());
        }
        if let Some(gb) = budget.mem_gb {
            command = command.env("PIPELINE_MEM_GB", gb.to_string());
        }
        if let Some(o) = module_override {
            for (k, v) in &o.env {
                command = command.env(k, v);
            }
        }
        (arguments, command)
    }

    /// Execute a whole run.
    ///
    /// `Err` means the run failed before any module was attempted. Every
    /// other outcome, including a halted pipeline, is an `Ok` report.
    pub async fn run(&mut self, request: &RunRequest) -> Result<RunReport> {
        self.run_id = pipeline_logging::new_run_id();
        self.log_failures.clear();
        let plan = self.plan(request)?;
        for warning in &plan.warnings {
            warn!("{warning}");
        }

        let names: Vec<_> = plan.modules.iter().map(|s| s.key.clone()).collect();
        let started = self
            .master
            .run_started(&plan.config.project, &self.run_id, &names, Utc::now());
        self.record(LogSink::Master, started);

        let stager = ScratchStager::new(&plan.config.scratch_root, &plan.config.project);
        let mut invocations = vec![];
        let mut halted_by = None;

        for (index, spec) in plan.modules.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, not starting {}", spec.name);
                halted_by = Some(PipelineError::ModuleExecutionFailed {
                    module: spec.name.clone(),
                    reason: "interrupted before start".into(),
                });
                self.state = DispatchState::Failed {
                    module: Some(spec.name.clone()),
                };
                break;
            }

            self.state = DispatchState::Running {
                index,
                module: spec.name.clone(),
            };
            let (invocation, error) = self.invoke(&plan, spec, &stager).await;
            self.finish_invocation(&plan, &invocation);

            invocations.push(invocation);
            if let Some(error) = error {
                halted_by = Some(error);
                self.state = DispatchState::Failed {
                    module: Some(spec.name.clone()),
                };
                break;
            }
        }

        let outcome = if halted_by.is_some() {
            "halted"
        } else {
            self.state = DispatchState::Completed;
            "completed"
        };
        let finished = self.master.run_finished(Utc::now(), outcome);
        self.record(LogSink::Master, finished);

        Ok(RunReport {
            run_id: self.run_id.clone(),
            project: plan.config.project.clone(),
            state: self.state.clone(),
            invocations,
            halted_by,
            log_failures: std::mem::take(&mut self.log_failures),
            warnings: plan.warnings,
        })
    }

    /// Stage, run and dispose of one module. Returns the finished record and
    /// the error that should halt the run, if any.
    async fn invoke(
        &mut self,
        plan: &Plan,
        spec: &ModuleSpec,
        stager: &ScratchStager,
    ) -> (Invocation, Option<PipelineError>) {
        let (arguments, command) = self.command_for(plan, spec);
        let log = ModuleLog::new(&plan.config.log_root, &spec.name);
        let pending = PendingInvocation::start(
            &self.run_id,
            &spec.key,
            &spec.name,
            &plan.selection,
            arguments,
            command.command_line(),
            log.path().to_path_buf(),
        );
        info!("Running module {} ({})", spec.key, spec.name);
        let started = self
            .master
            .module_started(&spec.key, &spec.name, pending.started_at());
        self.record(LogSink::Master, started);

        let mut header = vec![
            format!(
                "Running module {} ({}) with command: {}",
                spec.key,
                spec.name,
                pending.command_line()
            ),
            format!(
                "Started at: {}",
                pending.started_at().to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        ];

        let staged = match stager.stage(&spec.name) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Could not stage {}: {e}", spec.name);
                let reason = e.to_string();
                if let Ok(file) = self.open_module_log(&log, &header) {
                    drop(file);
                    let footer = log.append_footer(&format!("Not started: {reason}"));
                    self.record(LogSink::Module, footer);
                }
                let invocation = pending.finalize(
                    None,
                    InvocationOutcome::Failed { reason },
                    ScratchDisposition::NotStaged,
                );
                return (invocation, Some(e));
            }
        };
        header.push(format!("Working directory: {}", staged.path().display()));
        let command = command.env("PIPELINE_WORK_DIR", staged.path().display().to_string());

        let (sink, log_open) = match self.open_module_log(&log, &header) {
            Ok(file) => (OutputSink::File(file), true),
            Err(()) => (OutputSink::Discard, false),
        };

        let (exit, outcome) = match self.runner.run(&command, sink).await {
            Ok(state) if state.success() => (Some(state), InvocationOutcome::Succeeded),
            Ok(state) => (
                Some(state),
                InvocationOutcome::Failed {
                    reason: state.to_string(),
                },
            ),
            Err(e) => (
                None,
                InvocationOutcome::Failed {
                    reason: e.to_string(),
                },
            ),
        };
        debug!("Module {} ended: {outcome:?}", spec.name);

        let scratch = match outcome.reason() {
            None => stager.release(staged),
            Some(reason) => {
                let marker = PreservedMarker {
                    invocation_id: pending.invocation_id().to_string(),
                    run_id: self.run_id.clone(),
                    project: plan.config.project.clone(),
                    module: spec.key.clone(),
                    module_name: spec.name.clone(),
                    started_at: pending.started_at(),
                    command_line: pending.command_line().to_string(),
                    reason: reason.to_string(),
                    log_file: pending.log_file().to_path_buf(),
                };
                stager.preserve(staged, &marker)
            }
        };

        if log_open {
            let status = match &outcome {
                InvocationOutcome::Succeeded => TransitionStatus::Success,
                InvocationOutcome::Failed { reason } => TransitionStatus::Failed {
                    reason: reason.clone(),
                },
            };
            let footer = log.append_footer(&format!(
                "Finished at {} with status {status}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
            self.record(LogSink::Module, footer);
        }

        let error = outcome
            .reason()
            .map(|reason| PipelineError::ModuleExecutionFailed {
                module: spec.name.clone(),
                reason: reason.to_string(),
            });
        (pending.finalize(exit, outcome, scratch), error)
    }

    /// Master-log transition and summary row for a finished invocation.
    fn finish_invocation(&mut self, plan: &Plan, invocation: &Invocation) {
        let status = match &invocation.outcome {
            InvocationOutcome::Succeeded => TransitionStatus::Success,
            InvocationOutcome::Failed { reason } => TransitionStatus::Failed {
                reason: reason.clone(),
            },
        };
        let finished = self.master.module_finished(
            &invocation.module,
            &invocation.module_name,
            invocation.completed_at,
            &status,
        );
        self.record(LogSink::Master, finished);

        if !invocation.succeeded() {
            let mut notes = vec![format!(
                "module log: {}",
                invocation.log_file.display()
            )];
            if let Some(dir) = invocation.work_dir() {
                notes.push(format!("working directory preserved at {}", dir.display()));
            }
            for note in notes {
                let written = self.master.note(&note);
                self.record(LogSink::Master, written);
            }
        }

        let appended = self
            .summary
            .append(&invocation.to_summary(&plan.config.project));
        self.record(LogSink::Summary, appended);
    }

    fn open_module_log(
        &mut self,
        log: &ModuleLog,
        header: &[String],
    ) -> std::result::Result<std::fs::File, ()> {
        log.create(header).map_err(|e| {
            self.record(LogSink::Module, Err(e));
        })
    }

    fn record(&mut self, sink: LogSink, result: std::result::Result<(), LogError>) {
        if let Err(source) = result {
            warn!("Failed to write {sink}: {source}");
            self.log_failures
                .push(PipelineError::LogWriteFailed { sink, source });
        }
    }
}
