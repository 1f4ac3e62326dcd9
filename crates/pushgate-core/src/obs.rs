//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`], attached to futures with
//!   `tracing::Instrument`
//! - Emission functions for key lifecycle events: start, stage change,
//!   step finish, promotion attempt, notification failure, finish
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).
//! For JSON output, pass `--json-logs` to the CLI.

use tracing::{info, warn};

use crate::domain::{BranchPair, RunStage};

/// Span tagged with the run id and commit; every log line inside a run
/// carries both.
pub fn run_span(run_id: &str, commit: &str) -> tracing::Span {
    tracing::info_span!("pushgate.run", run_id = %run_id, commit = %commit)
}

/// Emit event: run started for a commit on a branch pair.
pub fn emit_run_started(run_id: &str, commit: &str, pair: &BranchPair) {
    info!(
        event = "run.started",
        run_id = %run_id,
        commit = %commit,
        source = %pair.source,
        target = %pair.target,
    );
}

/// Emit event: run moved between stages.
pub fn emit_stage_changed(run_id: &str, from: RunStage, to: RunStage) {
    info!(event = "run.stage_changed", run_id = %run_id, from = %from, to = %to);
}

/// Emit event: a single event appended to the run.
pub fn emit_event_appended(run_id: &str, event_kind: &str, seq: u64) {
    tracing::debug!(event = "run.event_appended", run_id = %run_id, kind = %event_kind, seq = seq);
}

/// Emit event: a validation step finished.
pub fn emit_step_finished(step: &str, exit_code: i32, duration_ms: u64, timed_out: bool) {
    if exit_code == 0 && !timed_out {
        info!(event = "step.finished", step = %step, exit_code, duration_ms, passed = true);
    } else {
        warn!(
            event = "step.finished",
            step = %step,
            exit_code,
            duration_ms,
            timed_out,
            passed = false,
        );
    }
}

/// Emit event: one merge-and-push attempt of the promotion stage.
pub fn emit_promotion_attempt(attempt: u32, max_attempts: u32, result: &str) {
    info!(event = "promotion.attempt", attempt, max_attempts, result = %result);
}

/// Emit event: posting to the feedback channel failed (warning level).
pub fn emit_notification_failed(channel: &str, error: &dyn std::fmt::Display) {
    warn!(event = "notification.failed", channel = %channel, error = %error);
}

/// Emit event: run finished with outcome, duration and total events.
pub fn emit_run_finished(run_id: &str, outcome: &str, duration_ms: u64, total_events: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
        total_events = total_events,
    );
}

/// Emit event: ledger write failed (warning level). The run itself continues.
pub fn emit_ledger_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.ledger_error", run_id = %run_id, error = %error);
}
