//! Terminal run artifacts: what was promoted, or why promotion was blocked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{BranchPair, CommitRef};
use super::run::RunOutcome;
use super::validation::{OutputExcerpt, StepResult};

/// How the validated commit landed on the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    FastForward,
    MergeCommit,
    /// The target already contained the commit; nothing was pushed.
    UpToDate,
}

/// Delivery state of a message posted to the feedback channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    NotAttempted,
    Delivered,
    Failed { error: String },
}

/// Summary of a successful promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub run_id: Uuid,
    pub commit: CommitRef,
    pub pair: BranchPair,
    /// Target tip before promotion.
    pub previous_target: CommitRef,
    /// Target tip after promotion.
    pub new_target: CommitRef,
    pub merge_kind: MergeKind,
    /// Paths changed between `previous_target` and `new_target`, when cheaply available.
    pub changed_paths: Vec<String>,
    /// Merge-and-push cycles used (1 = no retry).
    pub attempts: u32,
    pub summary: String,
    /// Success announcement, when enabled.
    pub announcement: DeliveryStatus,
    pub promoted_at: DateTime<Utc>,
}

impl PromotionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        commit: CommitRef,
        pair: BranchPair,
        previous_target: CommitRef,
        new_target: CommitRef,
        merge_kind: MergeKind,
        changed_paths: Vec<String>,
        attempts: u32,
    ) -> Self {
        let summary = promotion_summary(&commit, &pair, merge_kind, &new_target, &changed_paths);
        Self {
            run_id,
            commit,
            pair,
            previous_target,
            new_target,
            merge_kind,
            changed_paths,
            attempts,
            summary,
            announcement: DeliveryStatus::NotAttempted,
            promoted_at: Utc::now(),
        }
    }

    pub fn with_announcement(mut self, status: DeliveryStatus) -> Self {
        self.announcement = status;
        self
    }
}

fn promotion_summary(
    commit: &CommitRef,
    pair: &BranchPair,
    kind: MergeKind,
    new_target: &CommitRef,
    changed_paths: &[String],
) -> String {
    let how = match kind {
        MergeKind::FastForward => "fast-forward".to_string(),
        MergeKind::MergeCommit => format!("merge commit {}", new_target.short()),
        MergeKind::UpToDate => "already up to date".to_string(),
    };
    let mut summary = format!(
        "Promoted {} from {} into {} ({})",
        commit.short(),
        pair.source,
        pair.target,
        how
    );
    if !changed_paths.is_empty() {
        summary.push_str(&format!(", {} path(s) changed", changed_paths.len()));
        for path in changed_paths.iter().take(10) {
            summary.push_str(&format!("\n  - {path}"));
        }
        if changed_paths.len() > 10 {
            summary.push_str(&format!("\n  ... and {} more", changed_paths.len() - 10));
        }
    }
    summary
}

/// Why promotion was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A validation step exited nonzero, timed out, or could not run.
    ValidationFailed,
    /// The validated commit could not be merged and pushed to the target.
    PromotionConflict,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ValidationFailed => "validation failed",
            FailureCategory::PromotionConflict => "promotion conflict",
        }
    }
}

/// Diagnostics for a blocked run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub run_id: Uuid,
    pub commit: CommitRef,
    pub pair: BranchPair,
    pub category: FailureCategory,
    /// Step that stopped validation (validation failures only).
    pub failing_step: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Bounded output of the failing step, or the last promotion error.
    pub excerpt: OutputExcerpt,
    /// Human-readable message posted to the feedback channel.
    pub message: String,
    pub delivery: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl FailureReport {
    /// Report for a run whose validation stopped at `step`.
    pub fn validation_failed(
        run_id: Uuid,
        commit: CommitRef,
        pair: BranchPair,
        step: &StepResult,
    ) -> Self {
        let cause = if step.timed_out {
            "timed out".to_string()
        } else {
            format!("exited with code {}", step.exit_code)
        };
        let mut message = format!(
            "Promotion of {} from {} into {} blocked: step '{}' {}.",
            commit.short(),
            pair.source,
            pair.target,
            step.name,
            cause
        );
        push_excerpt(&mut message, &step.output);

        Self {
            run_id,
            commit,
            pair,
            category: FailureCategory::ValidationFailed,
            failing_step: Some(step.name.clone()),
            exit_code: Some(step.exit_code),
            timed_out: step.timed_out,
            excerpt: step.output.clone(),
            message,
            delivery: DeliveryStatus::NotAttempted,
            created_at: Utc::now(),
        }
    }

    /// Report for a validated commit that could not be merged and pushed.
    pub fn promotion_conflict(
        run_id: Uuid,
        commit: CommitRef,
        pair: BranchPair,
        attempts: u32,
        last_error: &str,
    ) -> Self {
        let excerpt = OutputExcerpt::capture(last_error, 20, 4096);
        let mut message = format!(
            "Promotion of {} from {} into {} blocked: promotion conflict after {} attempt(s). \
             Validation passed; {} changed concurrently or could not be updated.",
            commit.short(),
            pair.source,
            pair.target,
            attempts,
            pair.target
        );
        push_excerpt(&mut message, &excerpt);

        Self {
            run_id,
            commit,
            pair,
            category: FailureCategory::PromotionConflict,
            failing_step: None,
            exit_code: None,
            timed_out: false,
            excerpt,
            message,
            delivery: DeliveryStatus::NotAttempted,
            created_at: Utc::now(),
        }
    }

    pub fn with_delivery(mut self, status: DeliveryStatus) -> Self {
        self.delivery = status;
        self
    }
}

fn push_excerpt(message: &mut String, excerpt: &OutputExcerpt) {
    if excerpt.is_empty() {
        return;
    }
    message.push_str("\n\n```\n");
    if excerpt.truncated {
        message.push_str("...\n");
    }
    message.push_str(&excerpt.text);
    message.push_str("\n```");
}

/// The single human-readable report every terminal run carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunReport {
    Promoted(PromotionRecord),
    Blocked(FailureReport),
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        match self {
            RunReport::Promoted(_) => RunOutcome::Promoted,
            RunReport::Blocked(_) => RunOutcome::Blocked,
        }
    }

    pub fn commit(&self) -> &CommitRef {
        match self {
            RunReport::Promoted(r) => &r.commit,
            RunReport::Blocked(r) => &r.commit,
        }
    }

    /// One message suitable for humans.
    pub fn render(&self) -> &str {
        match self {
            RunReport::Promoted(r) => &r.summary,
            RunReport::Blocked(r) => &r.message,
        }
    }

    pub fn promotion(&self) -> Option<&PromotionRecord> {
        match self {
            RunReport::Promoted(r) => Some(r),
            RunReport::Blocked(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            RunReport::Promoted(_) => None,
            RunReport::Blocked(r) => Some(r),
        }
    }
}
