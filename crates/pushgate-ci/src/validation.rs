//! Validation stage: check out the commit, then run each enabled step in
//! order, stopping at the first failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pushgate_core::{
    emit_step_finished, CommitRef, OutputExcerpt, RunEventKind, StepResult, ValidationResult,
    VersionControl,
};

use crate::journal::Journal;
use crate::runner::StepExecutor;
use crate::stage::StepConfig;

/// Step name recorded when the commit cannot be materialized.
pub const CHECKOUT_STEP: &str = "checkout";

/// Bounds applied to captured step output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcerptLimits {
    pub lines: usize,
    pub bytes: usize,
}

impl Default for ExcerptLimits {
    fn default() -> Self {
        Self {
            lines: 40,
            bytes: 8192,
        }
    }
}

impl ExcerptLimits {
    fn capture(&self, output: &str) -> OutputExcerpt {
        OutputExcerpt::capture(output, self.lines, self.bytes)
    }
}

pub struct ValidationStage {
    vcs: Arc<dyn VersionControl>,
    executor: Arc<dyn StepExecutor>,
    steps: Vec<StepConfig>,
    limits: ExcerptLimits,
    vcs_timeout: Duration,
}

impl ValidationStage {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        executor: Arc<dyn StepExecutor>,
        steps: Vec<StepConfig>,
    ) -> Self {
        Self {
            vcs,
            executor,
            steps,
            limits: ExcerptLimits::default(),
            vcs_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_limits(mut self, limits: ExcerptLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_vcs_timeout(mut self, timeout: Duration) -> Self {
        self.vcs_timeout = timeout;
        self
    }

    pub fn steps(&self) -> &[StepConfig] {
        &self.steps
    }

    /// Validate `commit`. Never writes to any branch.
    ///
    /// Infrastructure errors (checkout, spawn, timeout) are reported as a
    /// failing step with exit code -1 rather than as an error.
    pub async fn run(&self, commit: &CommitRef, journal: &Journal) -> ValidationResult {
        let checkout_started = Instant::now();
        let checkout_error = match tokio::time::timeout(self.vcs_timeout, self.vcs.checkout(commit))
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some((e.to_string(), false)),
            Err(_) => Some((
                format!("checkout timed out after {}s", self.vcs_timeout.as_secs()),
                true,
            )),
        };
        if let Some((error, timed_out)) = checkout_error {
            let result = StepResult {
                name: CHECKOUT_STEP.to_string(),
                exit_code: -1,
                output: self.limits.capture(&error),
                duration_ms: checkout_started.elapsed().as_millis() as u64,
                timed_out,
            };
            self.finished(&result, journal).await;
            return ValidationResult::from_steps(vec![result]);
        }

        let mut results = Vec::with_capacity(self.steps.len());
        for step in self.steps.iter().filter(|s| s.enabled) {
            journal
                .record(RunEventKind::StepStarted {
                    step: step.name.clone(),
                })
                .await;

            let result = self.run_step(step, commit).await;
            self.finished(&result, journal).await;

            let passed = result.passed();
            results.push(result);
            if !passed {
                break;
            }
        }
        ValidationResult::from_steps(results)
    }

    async fn run_step(&self, step: &StepConfig, commit: &CommitRef) -> StepResult {
        let started = Instant::now();
        let execution = self.executor.execute(step, commit);

        let outcome = if step.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(step.timeout_secs), execution).await
        } else {
            Ok(execution.await)
        };

        let (exit_code, output, timed_out) = match outcome {
            Ok(Ok(out)) => (out.exit_code, out.output, false),
            Ok(Err(e)) => (-1, e.to_string(), false),
            Err(_) => (
                -1,
                format!("step '{}' timed out after {}s", step.name, step.timeout_secs),
                true,
            ),
        };

        StepResult {
            name: step.name.clone(),
            exit_code,
            output: self.limits.capture(&output),
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out,
        }
    }

    async fn finished(&self, result: &StepResult, journal: &Journal) {
        emit_step_finished(
            &result.name,
            result.exit_code,
            result.duration_ms,
            result.timed_out,
        );
        journal
            .record(RunEventKind::StepFinished {
                step: result.name.clone(),
                passed: result.passed(),
            })
            .await;
    }
}
