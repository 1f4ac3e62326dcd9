//! Domain models for pushgate.
//!
//! Canonical definitions for the core entities:
//! - `PushEvent`: a push observed on a branch
//! - `PipelineRun`: one pipeline execution and its state machine
//! - `ValidationResult` / `StepResult`: what the validation stage saw
//! - `RunReport`: the promotion record or failure report of a finished run

pub mod error;
pub mod event;
pub mod report;
pub mod run;
pub mod validation;

pub use error::{PushgateError, Result};
pub use event::{BranchPair, CommitRef, PushEvent};
pub use report::{
    DeliveryStatus, FailureCategory, FailureReport, MergeKind, PromotionRecord, RunReport,
};
pub use run::{PipelineRun, RunEventKind, RunOutcome, RunStage};
pub use validation::{OutputExcerpt, StepResult, ValidationResult};
