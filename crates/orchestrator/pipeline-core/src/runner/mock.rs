use super::{CommandRunner, ExitState, ModuleCommand, OutputSink, RunnerError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// What the next scripted invocation does.
#[derive(Debug, Clone)]
pub enum Step {
    Exit(ExitState),
    SpawnFails,
}

/// Mock runner for testing. Plays back scripted steps in order; once the
/// script runs out every invocation exits 0.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<Vec<ModuleCommand>>>,
}

impl ScriptedRunner {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<ModuleCommand> {
        self.calls.lock().unwrap().clone()
    }

    /// Value of `key` in the environment of each recorded call.
    pub fn env_of_calls(&self, key: &str) -> Vec<Option<String>> {
        self.calls()
            .iter()
            .map(|c| {
                c.env
                    .iter()
                    .rev()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &ModuleCommand,
        output: OutputSink,
    ) -> Result<ExitState, RunnerError> {
        self.calls.lock().unwrap().push(command.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Exit(ExitState::Exited(0)));

        if let OutputSink::File(mut file) = output {
            writeln!(file, "scripted output for {}", command.program).unwrap();
        }

        match step {
            Step::Exit(state) => Ok(state),
            Step::SpawnFails => Err(RunnerError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            }),
        }
    }
}
