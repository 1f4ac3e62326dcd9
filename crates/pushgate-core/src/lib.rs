//! pushgate core library
//!
//! Domain model, capability interfaces and run recording for the pushgate
//! promotion pipeline. The stages themselves live in `pushgate-ci`.

pub mod domain;
pub mod fakes;
pub mod git;
pub mod notify;
pub mod obs;
pub mod recording;
pub mod telemetry;
pub mod vcs;

pub use domain::{
    BranchPair, CommitRef, DeliveryStatus, FailureCategory, FailureReport, MergeKind,
    OutputExcerpt, PipelineRun, PromotionRecord, PushEvent, PushgateError, Result, RunEventKind,
    RunOutcome, RunReport, RunStage, StepResult, ValidationResult,
};

pub use git::{is_git_repo, GitCli, CLEAN_EXCLUDES};

pub use notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier};

pub use obs::{
    emit_event_appended, emit_ledger_error, emit_notification_failed, emit_promotion_attempt,
    emit_run_finished, emit_run_started, emit_stage_changed, emit_step_finished, run_span,
};

pub use recording::RunRecorder;

pub use telemetry::init_tracing;

pub use vcs::{MergeOutcome, PushOutcome, VcsError, VersionControl};
