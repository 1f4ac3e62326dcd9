//! Step execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use pushgate_core::CommitRef;
use tokio::process::Command;
use tracing::debug;

use crate::stage::StepConfig;

/// Raw output of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Combined stdout and stderr.
    pub output: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StepOutput {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// The step could not be executed at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("step {0} has an empty command")]
    EmptyCommand(String),

    #[error("failed to spawn {program} for step {step}: {source}")]
    Spawn {
        step: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error while running step {step}: {source}")]
    Io {
        step: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability interface for running one validation step against a commit.
///
/// Timeouts are applied by the caller; implementations must stop the
/// underlying work when the returned future is dropped.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &StepConfig, commit: &CommitRef) -> Result<StepOutput, ExecError>;
}

/// Runs steps as child processes in the repository checkout.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    repo_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn execute(&self, step: &StepConfig, commit: &CommitRef) -> Result<StepOutput, ExecError> {
        let start = Instant::now();

        let Some((program, args)) = step.command.split_first() else {
            return Err(ExecError::EmptyCommand(step.name.clone()));
        };
        let workdir = match &step.workdir {
            Some(dir) => self.repo_dir.join(dir),
            None => self.repo_dir.clone(),
        };
        debug!(step = %step.name, ?program, workdir = %workdir.display(), "spawning step");

        let child = Command::new(program)
            .args(args)
            .current_dir(&workdir)
            .envs(&step.env)
            .env("PUSHGATE_COMMIT", commit.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                step: step.name.clone(),
                program: program.clone(),
                source,
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ExecError::Io {
                step: step.name.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = match (stdout.trim_end().is_empty(), stderr.trim_end().is_empty()) {
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
            (false, true) => stdout.trim_end().to_string(),
            (true, _) => stderr.trim_end().to_string(),
        };

        Ok(StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
