//! Scripted step executor (testing only)

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pushgate_core::CommitRef;

use crate::runner::{ExecError, StepExecutor, StepOutput};
use crate::stage::StepConfig;

/// What a scripted step does when executed.
#[derive(Debug, Clone)]
pub struct StepScript {
    exit_code: i32,
    output: String,
    delay: Duration,
    spawn_error: bool,
}

impl StepScript {
    pub fn pass() -> Self {
        Self::exit(0, "ok")
    }

    pub fn exit(exit_code: i32, output: &str) -> Self {
        Self {
            exit_code,
            output: output.to_string(),
            delay: Duration::ZERO,
            spawn_error: false,
        }
    }

    /// The program cannot be started.
    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::exit(-1, "")
        }
    }

    /// Sleep for `delay` before finishing.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`StepExecutor`] whose steps pass unless scripted otherwise.
///
/// Scripts can be set per step name or per (commit, step name); the
/// per-commit script wins.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    by_step: HashMap<String, StepScript>,
    by_commit: HashMap<(String, String), StepScript>,
    default: Option<StepScript>,
    calls: Mutex<Vec<(CommitRef, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, step: &str, script: StepScript) -> Self {
        self.by_step.insert(step.to_string(), script);
        self
    }

    pub fn script_for(mut self, commit: &str, step: &str, script: StepScript) -> Self {
        self.by_commit
            .insert((commit.to_string(), step.to_string()), script);
        self
    }

    /// Script used for steps with no explicit script.
    pub fn default_script(mut self, script: StepScript) -> Self {
        self.default = Some(script);
        self
    }

    /// Every `(commit, step)` executed, in order.
    pub fn calls(&self) -> Vec<(CommitRef, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Commits validated, in the order their first step ran.
    pub fn commits(&self) -> Vec<CommitRef> {
        let mut seen = Vec::new();
        for (commit, _) in self.calls() {
            if !seen.contains(&commit) {
                seen.push(commit);
            }
        }
        seen
    }

    /// Highest number of steps that were executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script_for_call(&self, step: &str, commit: &CommitRef) -> StepScript {
        self.by_commit
            .get(&(commit.to_string(), step.to_string()))
            .or_else(|| self.by_step.get(step))
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_else(StepScript::pass)
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &StepConfig, commit: &CommitRef) -> Result<StepOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((commit.clone(), step.name.clone()));
        let script = self.script_for_call(&step.name, commit);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if script.spawn_error {
            return Err(ExecError::Spawn {
                step: step.name.clone(),
                program: step.command.first().cloned().unwrap_or_default(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }
        Ok(StepOutput {
            exit_code: script.exit_code,
            output: script.output,
            duration_ms: script.delay.as_millis() as u64,
        })
    }
}
