//! Run lifecycle adapter: bridges `PipelineRun` transitions and `RunEventKind`
//! events to `RunLedger` persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use pushgate_state::{
    RunEvent, RunId, RunLedger, RunMetadata, RunOutcome as LedgerOutcome, RunSummary,
    StorageError, StorageResult,
};

use crate::domain::run::{PipelineRun, RunEventKind, RunStage};

/// Records one pipeline run into a [`RunLedger`].
///
/// Usage:
/// 1. Call [`RunRecorder::start`] when the run is created.
/// 2. Call [`RunRecorder::record`] for each event while it executes.
/// 3. Call [`RunRecorder::finish`] once the run is terminal.
pub struct RunRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    seq: AtomicU64,
}

impl RunRecorder {
    /// Create the ledger record for `run`, returning a recorder bound to it.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        run: &PipelineRun,
        tags: serde_json::Value,
    ) -> StorageResult<Self> {
        let run_id = RunId(run.run_id().to_string());
        let metadata = RunMetadata {
            commit: run.commit().to_string(),
            source_branch: run.pair().source.clone(),
            target_branch: run.pair().target.clone(),
            triggered_at: run.triggered_at(),
            tags,
        };
        ledger.create_run(&run_id, metadata).await?;
        crate::obs::emit_run_started(&run_id.to_string(), run.commit().as_str(), run.pair());
        Ok(Self {
            ledger,
            run_id,
            seq: AtomicU64::new(0),
        })
    }

    /// Append one event; sequence numbers are assigned here.
    pub async fn record(&self, kind: &RunEventKind) -> StorageResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = RunEvent {
            seq,
            kind: kind.kind_str().to_string(),
            payload: serde_json::to_value(kind)?,
            timestamp: Utc::now(),
        };
        crate::obs::emit_event_appended(&self.run_id.to_string(), kind.kind_str(), seq);
        self.ledger.append_event(&self.run_id, event).await
    }

    /// Finalize the ledger record from the terminal `run`.
    ///
    /// `Failed` runs are stored with `fail_run`, `Completed` runs with
    /// `complete_run`. Either way the summary carries the run's report.
    pub async fn finish(self, run: &PipelineRun, duration_ms: u64) -> StorageResult<()> {
        let report = run.report().ok_or_else(|| StorageError::InvalidRunState {
            run_id: self.run_id.to_string(),
            status: run.stage().to_string(),
            expected: "a terminal run with a report".to_string(),
        })?;
        let summary = RunSummary {
            total_events: self.seq.load(Ordering::SeqCst),
            duration_ms,
            outcome: LedgerOutcome::from(report.outcome()),
            report: serde_json::to_value(report)?,
        };

        crate::obs::emit_run_finished(
            &self.run_id.to_string(),
            summary.outcome.as_str(),
            duration_ms,
            summary.total_events,
        );
        match run.stage() {
            RunStage::Failed => self.ledger.fail_run(&self.run_id, summary).await,
            _ => self.ledger.complete_run(&self.run_id, summary).await,
        }
    }

    /// Return a reference to the run ID.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}
