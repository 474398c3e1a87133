use super::{CommandRunner, ExitState, ModuleCommand, OutputSink, RunnerError};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// Runs modules as child processes, each in its own process group.
///
/// When `shutdown` is cancelled the running module's whole group gets
/// SIGTERM, then SIGKILL once `grace` has passed.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shutdown: CancellationToken,
    grace: Duration,
}

impl ProcessRunner {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            grace: Self::DEFAULT_GRACE,
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn terminate(&self, child: &mut Child, program: &str) {
        let pid = child.id().and_then(|id| i32::try_from(id).ok());
        info!("Stopping {program} (pid {pid:?})");
        signal_group(pid, Term::Polite);

        if tokio::time::timeout(self.grace, child.wait()).await.is_ok() {
            return;
        }
        warn!(
            "{program} still running after {}s, killing",
            self.grace.as_secs()
        );
        signal_group(pid, Term::Forced);
        if let Err(e) = child.kill().await {
            debug!("Kill after group SIGKILL: {e}");
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &ModuleCommand,
        output: OutputSink,
    ) -> Result<ExitState, RunnerError> {
        if self.shutdown.is_cancelled() {
            return Ok(ExitState::Interrupted);
        }

        let (stdout, stderr) = match output {
            OutputSink::File(file) => {
                let err = file.try_clone().map_err(RunnerError::Output)?;
                (Stdio::from(file), Stdio::from(err))
            }
            OutputSink::Discard => (Stdio::null(), Stdio::null()),
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        debug!("Started {} (pid {:?})", command.program, child.id());

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = self.shutdown.cancelled() => None,
        };

        match waited {
            Some(status) => {
                let status = status.map_err(|source| RunnerError::Wait {
                    program: command.program.clone(),
                    source,
                })?;
                Ok(exit_state(status))
            }
            None => {
                self.terminate(&mut child, &command.program).await;
                Ok(ExitState::Interrupted)
            }
        }
    }
}

enum Term {
    Polite,
    Forced,
}

#[cfg(unix)]
fn signal_group(pid: Option<i32>, term: Term) {
    let Some(pid) = pid else { return };
    let signal = match term {
        Term::Polite => Signal::SIGTERM,
        Term::Forced => Signal::SIGKILL,
    };
    // The child leads its own group, so its pid is the group id
    if let Err(e) = killpg(Pid::from_raw(pid), signal) {
        debug!("killpg({pid}, {signal}) failed: {e}");
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<i32>, _term: Term) {}

fn exit_state(status: ExitStatus) -> ExitState {
    if let Some(code) = status.code() {
        return ExitState::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitState::Signaled(signal);
        }
    }
    ExitState::Exited(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;

    fn sh(script: &str) -> ModuleCommand {
        ModuleCommand::new("/bin/sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn reports_exit_codes() {
        let runner = ProcessRunner::new(CancellationToken::new());
        let ok = runner.run(&sh("exit 0"), OutputSink::Discard).await.unwrap();
        let failed = runner.run(&sh("exit 3"), OutputSink::Discard).await.unwrap();
        assert_eq!(ok, ExitState::Exited(0));
        assert_eq!(failed, ExitState::Exited(3));
    }

    #[tokio::test]
    async fn merges_stdout_and_stderr_into_the_sink() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();

        let runner = ProcessRunner::new(CancellationToken::new());
        let cmd = sh("echo to-stdout; echo to-stderr >&2; echo \"$PIPELINE_MODULE\"")
            .env("PIPELINE_MODULE", "mriqc");
        runner.run(&cmd, OutputSink::File(file)).await.unwrap();

        let mut content = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.contains("to-stdout"));
        assert!(content.contains("to-stderr"));
        assert!(content.contains("mriqc"));
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let runner = ProcessRunner::new(CancellationToken::new());
        let cmd = ModuleCommand::new("/nonexistent/module-binary", vec![]);
        let err = runner.run(&cmd, OutputSink::Discard).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_starts_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("ran");

        let runner = ProcessRunner::new(token);
        let cmd = sh(&format!("touch {}", marker.display()));
        let state = runner.run(&cmd, OutputSink::Discard).await.unwrap();
        assert_eq!(state, ExitState::Interrupted);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn cancellation_escalates_to_sigkill() {
        let token = CancellationToken::new();
        let runner =
            ProcessRunner::new(token.clone()).with_grace(Duration::from_millis(200));
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let state = runner
            .run(&sh("trap '' TERM; sleep 30"), OutputSink::Discard)
            .await
            .unwrap();
        cancel.await.unwrap();

        assert_eq!(state, ExitState::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
