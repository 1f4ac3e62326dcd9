//! Best-effort run recording used by the stages.
//!
//! Ledger failures are logged and swallowed: a run always reaches its
//! terminal state with its in-memory report, whether or not the ledger
//! accepted the writes.

use pushgate_core::{
    emit_ledger_error, emit_run_finished, emit_stage_changed, PipelineRun, RunEventKind,
    RunRecorder, RunStage,
};

pub struct Journal {
    run_id: String,
    recorder: Option<RunRecorder>,
}

impl Journal {
    pub fn new(run_id: impl Into<String>, recorder: Option<RunRecorder>) -> Self {
        Self {
            run_id: run_id.into(),
            recorder,
        }
    }

    /// Journal that only logs. Used when no ledger is configured.
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self::new(run_id, None)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn record(&self, kind: RunEventKind) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(&kind).await {
                emit_ledger_error(&self.run_id, &e);
            }
        }
    }

    pub async fn stage_changed(&self, from: RunStage, to: RunStage) {
        emit_stage_changed(&self.run_id, from, to);
        self.record(RunEventKind::StageChanged { from, to }).await;
    }

    pub async fn finish(self, run: &PipelineRun, duration_ms: u64) {
        match self.recorder {
            Some(recorder) => {
                if let Err(e) = recorder.finish(run, duration_ms).await {
                    emit_ledger_error(&self.run_id, &e);
                }
            }
            None => {
                emit_run_finished(
                    &self.run_id,
                    run.outcome().map_or("unknown", |o| o.as_str()),
                    duration_ms,
                    0,
                );
            }
        }
    }
}
