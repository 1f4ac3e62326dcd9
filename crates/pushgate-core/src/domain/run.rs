//! Pipeline run state machine.
//!
//! ```text
//! Pending -> Validating -> Promoting -> Completed (Promoted)
//!                      \             \-> Failed    (Blocked, promotion conflict)
//!                       \-> Notifying -> Completed (Blocked)
//! ```
//!
//! Each stage owns exactly one transition function. Once a run is terminal
//! every transition is rejected, so the attached report can never change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{PushgateError, Result};
use super::event::{BranchPair, CommitRef, PushEvent};
use super::report::{FailureCategory, FailureReport, PromotionRecord, RunReport};
use super::validation::ValidationResult;

/// Stage a run is currently in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Pending,
    Validating,
    Promoting,
    Notifying,
    Completed,
    Failed,
}

impl RunStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Pending => "pending",
            RunStage::Validating => "validating",
            RunStage::Promoting => "promoting",
            RunStage::Notifying => "notifying",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Promoted,
    Blocked,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Promoted => "promoted",
            RunOutcome::Blocked => "blocked",
        }
    }
}

impl From<RunOutcome> for pushgate_state::RunOutcome {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Promoted => pushgate_state::RunOutcome::Promoted,
            RunOutcome::Blocked => pushgate_state::RunOutcome::Blocked,
        }
    }
}

/// One execution of the pipeline for one pushed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: Uuid,
    commit: CommitRef,
    pair: BranchPair,
    triggered_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    stage: RunStage,
    validation: Option<ValidationResult>,
    report: Option<RunReport>,
}

impl PipelineRun {
    /// Create a run in `Pending` for an accepted push.
    pub fn new(event: &PushEvent, target_branch: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            commit: event.commit.clone(),
            pair: BranchPair::new(event.branch.clone(), target_branch),
            triggered_at: event.timestamp,
            started_at: Utc::now(),
            finished_at: None,
            stage: RunStage::Pending,
            validation: None,
            report: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn commit(&self) -> &CommitRef {
        &self.commit
    }

    pub fn pair(&self) -> &BranchPair {
        &self.pair
    }

    pub fn triggered_at(&self) -> DateTime<Utc> {
        self.triggered_at
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.report.as_ref().map(RunReport::outcome)
    }

    fn expect_stage(&self, expected: RunStage, action: &'static str) -> Result<()> {
        if self.stage != expected {
            return Err(PushgateError::InvalidTransition {
                stage: self.stage,
                action,
            });
        }
        Ok(())
    }

    fn finish(&mut self, stage: RunStage, report: RunReport) {
        self.stage = stage;
        self.report = Some(report);
        self.finished_at = Some(Utc::now());
    }

    /// Pending → Validating.
    pub fn begin_validation(&mut self) -> Result<()> {
        self.expect_stage(RunStage::Pending, "begin validation")?;
        self.stage = RunStage::Validating;
        Ok(())
    }

    /// Validating → Promoting (success) | Notifying (failure).
    pub fn record_validation(&mut self, result: ValidationResult) -> Result<RunStage> {
        self.expect_stage(RunStage::Validating, "record validation")?;
        self.stage = if result.success() {
            RunStage::Promoting
        } else {
            RunStage::Notifying
        };
        self.validation = Some(result);
        Ok(self.stage)
    }

    /// Promoting → Completed with outcome Promoted.
    pub fn complete_promotion(&mut self, record: PromotionRecord) -> Result<()> {
        self.expect_stage(RunStage::Promoting, "complete promotion")?;
        if record.commit != self.commit {
            return Err(PushgateError::CommitMismatch {
                validated: self.commit.to_string(),
                promoted: record.commit.to_string(),
            });
        }
        self.finish(RunStage::Completed, RunReport::Promoted(record));
        Ok(())
    }

    /// Promoting → Failed with outcome Blocked (promotion conflict).
    pub fn fail_promotion(&mut self, report: FailureReport) -> Result<()> {
        self.expect_stage(RunStage::Promoting, "fail promotion")?;
        if report.category != FailureCategory::PromotionConflict {
            return Err(PushgateError::InvalidTransition {
                stage: self.stage,
                action: "fail promotion with a validation report",
            });
        }
        self.finish(RunStage::Failed, RunReport::Blocked(report));
        Ok(())
    }

    /// Notifying → Completed with outcome Blocked (validation failure).
    pub fn complete_blocked(&mut self, report: FailureReport) -> Result<()> {
        self.expect_stage(RunStage::Notifying, "complete blocked")?;
        if report.category != FailureCategory::ValidationFailed {
            return Err(PushgateError::InvalidTransition {
                stage: self.stage,
                action: "block with a promotion report",
            });
        }
        self.finish(RunStage::Completed, RunReport::Blocked(report));
        Ok(())
    }
}

/// Classification of an event recorded while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// The run moved to a new stage.
    StageChanged { from: RunStage, to: RunStage },

    /// A validation step started.
    StepStarted { step: String },

    /// A validation step finished (passed or failed).
    StepFinished { step: String, passed: bool },

    /// One merge-and-push cycle of the promotion stage.
    PromotionAttempt { attempt: u32, succeeded: bool },

    /// A message was posted to the feedback channel.
    NotificationDelivered { channel: String },

    /// Posting to the feedback channel failed.
    NotificationFailed { channel: String },
}

impl RunEventKind {
    /// The snake_case kind string used in the ledger.
    pub fn kind_str(&self) -> &'static str {
        match self {
            RunEventKind::StageChanged { .. } => "stage_changed",
            RunEventKind::StepStarted { .. } => "step_started",
            RunEventKind::StepFinished { .. } => "step_finished",
            RunEventKind::PromotionAttempt { .. } => "promotion_attempt",
            RunEventKind::NotificationDelivered { .. } => "notification_delivered",
            RunEventKind::NotificationFailed { .. } => "notification_failed",
        }
    }
}
