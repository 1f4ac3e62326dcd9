//! Pipeline orchestration and run recording.
//!
//! [`Pipeline::execute`] drives one run from `Pending` to a terminal stage:
//!
//! ```text
//! Pending → Validating ─ success → Promoting ─ landed   → Completed (Promoted)
//!                      │                    └ exhausted → Failed    (Blocked)
//!                      └ failure → Notifying            → Completed (Blocked)
//! ```
//!
//! Failures of the stages themselves (a failing step, a rejected push, an
//! undeliverable notification) all end in a report on the run, never in an
//! error.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use pushgate_core::{
    emit_ledger_error, emit_run_started, run_span, FailureReport, Notifier, PipelineRun,
    PushEvent, PushgateError, Result, RunRecorder, RunStage, VersionControl,
};
use pushgate_state::RunLedger;
use tracing::{info, Instrument};

use crate::config::PipelineConfig;
use crate::journal::Journal;
use crate::notification::NotificationStage;
use crate::promotion::PromotionStage;
use crate::runner::StepExecutor;
use crate::validation::ValidationStage;

/// One source → target pipeline: its stages and where runs are recorded.
pub struct Pipeline {
    validation: ValidationStage,
    promotion: PromotionStage,
    notification: NotificationStage,
    notify_on_success: bool,
    ledger: Option<Arc<dyn RunLedger>>,
    tags: serde_json::Value,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        repo_dir: &Path,
        vcs: Arc<dyn VersionControl>,
        executor: Arc<dyn StepExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let validation = ValidationStage::new(vcs.clone(), executor, config.steps.clone())
            .with_limits(config.excerpt_limits())
            .with_vcs_timeout(config.vcs_timeout());
        Self {
            validation,
            promotion: PromotionStage::new(vcs, config.promotion_policy()),
            notification: NotificationStage::new(notifier, config.channel.clone()),
            notify_on_success: config.notify_on_success,
            ledger: None,
            tags: config.pipeline_spec(repo_dir).tags(),
        }
    }

    /// Record every run into `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Run the full pipeline for `event`, promoting into `target`.
    ///
    /// Returns the terminal run. An `Err` means the state machine itself was
    /// driven incorrectly, not that the run failed.
    pub async fn execute(&self, event: &PushEvent, target: &str) -> Result<PipelineRun> {
        let run = PipelineRun::new(event, target);
        let span = run_span(&run.run_id().to_string(), run.commit().as_str());
        self.drive(run).instrument(span).await
    }

    async fn drive(&self, mut run: PipelineRun) -> Result<PipelineRun> {
        let started = Instant::now();
        let run_id = run.run_id().to_string();

        let recorder = match &self.ledger {
            Some(ledger) => match RunRecorder::start(ledger.clone(), &run, self.tags.clone()).await
            {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    emit_ledger_error(&run_id, &e);
                    None
                }
            },
            None => None,
        };
        if recorder.is_none() {
            emit_run_started(&run_id, run.commit().as_str(), run.pair());
        }
        let journal = Journal::new(run_id, recorder);

        run.begin_validation()?;
        journal
            .stage_changed(RunStage::Pending, RunStage::Validating)
            .await;

        let validation = self.validation.run(run.commit(), &journal).await;
        let next = run.record_validation(validation)?;
        journal.stage_changed(RunStage::Validating, next).await;

        match next {
            RunStage::Promoting => self.promote(&mut run, &journal).await?,
            RunStage::Notifying => self.block(&mut run, &journal).await?,
            stage => {
                return Err(PushgateError::InvalidTransition {
                    stage,
                    action: "leave validation",
                })
            }
        }

        if let Some(report) = run.report() {
            info!(outcome = %report.outcome().as_str(), "{}", report.render());
        }
        journal
            .finish(&run, started.elapsed().as_millis() as u64)
            .await;
        Ok(run)
    }

    async fn promote(&self, run: &mut PipelineRun, journal: &Journal) -> Result<()> {
        match self.promotion.run(run, journal).await {
            Ok(record) => {
                let record = if self.notify_on_success {
                    let status = self.notification.deliver(&record.summary, journal).await;
                    record.with_announcement(status)
                } else {
                    record
                };
                run.complete_promotion(record)?;
                journal
                    .stage_changed(RunStage::Promoting, RunStage::Completed)
                    .await;
            }
            Err(report) => {
                let status = self.notification.deliver(&report.message, journal).await;
                run.fail_promotion(report.with_delivery(status))?;
                journal
                    .stage_changed(RunStage::Promoting, RunStage::Failed)
                    .await;
            }
        }
        Ok(())
    }

    async fn block(&self, run: &mut PipelineRun, journal: &Journal) -> Result<()> {
        let failing = run
            .validation()
            .and_then(|v| v.failing_step())
            .cloned()
            .ok_or(PushgateError::InvalidTransition {
                stage: RunStage::Notifying,
                action: "notify without a failing step",
            })?;
        let report = FailureReport::validation_failed(
            run.run_id(),
            run.commit().clone(),
            run.pair().clone(),
            &failing,
        );
        let status = self.notification.deliver(&report.message, journal).await;
        run.complete_blocked(report.with_delivery(status))?;
        journal
            .stage_changed(RunStage::Notifying, RunStage::Completed)
            .await;
        Ok(())
    }
}
