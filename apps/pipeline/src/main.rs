//! Pipeline orchestrator CLI.
//!
//! Runs the requested processing modules for one project, in order, and
//! stops at the first failure. The master log goes to standard output;
//! diagnostics go to standard error.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use pipeline_config::{ConfigResolver, PipelinePaths};
use pipeline_core::{
    Dispatcher, LaunchSettings, ModuleRegistry, PipelineError, ProcessRunner, RunReport,
    RunRequest, ScratchStager,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

mod signals;

/// Exit code when a module failed or the run was interrupted.
const EXIT_INCOMPLETE: u8 = 1;
/// Exit code when nothing could be run at all.
const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "Run neuroimaging processing modules for a project, in order")]
#[command(version)]
struct Cli {
    /// Project name (a directory under the projects root)
    #[arg(short, long)]
    project: String,

    /// Modules to run, by key or name, in execution order
    #[arg(short, long, num_args = 1.., required = true)]
    modules: Vec<String>,

    /// Subjects to process (default: all)
    #[arg(short, long = "subject", visible_alias = "subjects", num_args = 1..)]
    subjects: Option<Vec<String>>,

    /// Sessions to process (default: all)
    #[arg(short = 'n', long = "session", visible_alias = "sessions", num_args = 1..)]
    sessions: Option<Vec<String>>,

    /// Runs to process (default: all)
    #[arg(short, long = "run", visible_alias = "runs", num_args = 1..)]
    runs: Option<Vec<String>>,

    /// Root directory holding one directory per project [default: ~/projects]
    #[arg(long, env = "PIPELINE_PROJECTS_DIR")]
    projects_dir: Option<PathBuf>,

    /// Run-summary store [default: <projects dir>/pipeline_summary.jsonl]
    #[arg(long, env = "PIPELINE_SUMMARY")]
    summary: Option<PathBuf>,

    /// Directory containing the module scripts [default: current directory]
    #[arg(long, env = "PIPELINE_MODULES_ROOT")]
    modules_root: Option<PathBuf>,

    /// Interpreter used to launch module scripts
    #[arg(long, env = "PIPELINE_PYTHON", default_value = "python")]
    python: String,

    /// Print the planned commands without running anything
    #[arg(long)]
    dry_run: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Extra arguments forwarded to every module. Give these last.
    #[arg(short = 'x', long = "extra_args", num_args = 1.., allow_hyphen_values = true)]
    extra_args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut paths = match cli.projects_dir {
        Some(dir) => PipelinePaths::new(dir),
        None => PipelinePaths::from_home()?,
    };
    if let Some(summary) = cli.summary {
        paths = paths.with_summary_path(summary);
    }
    let modules_root = match cli.modules_root {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let launch = LaunchSettings::new(modules_root).with_python(cli.python);
    let registry = ModuleRegistry::builtin()?;

    let shutdown = CancellationToken::new();
    signals::forward_to(shutdown.clone()).context("Failed to install signal handlers")?;

    let request = RunRequest {
        project: cli.project,
        modules: cli.modules,
        subjects: cli.subjects,
        sessions: cli.sessions,
        runs: cli.runs,
        extra_args: cli.extra_args,
    };
    let runner = ProcessRunner::new(shutdown.clone());
    let mut dispatcher = Dispatcher::new(
        ConfigResolver::new(paths),
        registry,
        launch,
        runner,
        std::io::stdout(),
    )
    .with_shutdown(shutdown);

    if cli.dry_run {
        return Ok(dry_run(&mut dispatcher, &request));
    }

    match dispatcher.run(&request).await {
        Ok(report) => Ok(finish(&report)),
        Err(e) => Ok(fatal(&e)),
    }
}

fn dry_run<W: std::io::Write>(
    dispatcher: &mut Dispatcher<ProcessRunner, W>,
    request: &RunRequest,
) -> ExitCode {
    let plan = match dispatcher.plan(request) {
        Ok(plan) => plan,
        Err(e) => return fatal(&e),
    };
    for warning in &plan.warnings {
        tracing::warn!("{warning}");
    }

    let stager = ScratchStager::new(&plan.config.scratch_root, &plan.config.project);
    println!(
        "Dry run for project {} using {}",
        plan.config.project,
        plan.config.config_path.display()
    );
    for spec in &plan.modules {
        let (_, command) = dispatcher.command_for(&plan, spec);
        println!("  {} ({}): {}", spec.key, spec.name, command.command_line());
    }
    println!("Working directories under {}", stager.base().display());
    println!("Module logs under {}", plan.config.log_root.display());
    ExitCode::SUCCESS
}

fn fatal(err: &PipelineError) -> ExitCode {
    eprintln!("{} {err}", "Error:".red().bold());
    eprintln!("No modules were run.");
    ExitCode::from(EXIT_FATAL)
}

fn finish(report: &RunReport) -> ExitCode {
    for failure in &report.log_failures {
        eprintln!("{} {failure}", "Warning:".yellow());
    }

    if report.completed() {
        eprintln!(
            "{} Pipeline completed for {} ({} module(s))",
            "✓".green(),
            report.project,
            report.invocations.len()
        );
        return ExitCode::SUCCESS;
    }

    match report.failed_invocation() {
        Some(failed) => {
            let reason = failed.outcome.reason().unwrap_or("unknown");
            eprintln!(
                "{} Module {} ({}) failed: {reason}",
                "✗".red(),
                failed.module,
                failed.module_name
            );
            eprintln!("  Log: {}", failed.log_file.display());
            match failed.work_dir() {
                Some(dir) => eprintln!(
                    "  Working directory preserved for inspection: {}",
                    dir.display()
                ),
                None => eprintln!("  No working directory was created"),
            }
        }
        None => {
            if let Some(err) = &report.halted_by {
                eprintln!("{} {err}", "✗".red());
            }
        }
    }
    eprintln!("Pipeline incomplete; remaining modules were not run.");
    ExitCode::from(EXIT_INCOMPLETE)
}
