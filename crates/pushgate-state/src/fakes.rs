//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRunLedger`, which satisfies the `RunLedger` contract
//! without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// In-memory run ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(&self, run_id: &RunId, status: RunStatus, summary: RunSummary) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = running_state(&mut runs, run_id)?;
        state.record.status = status;
        state.record.summary = Some(summary);
        state.record.completed_at = Some(Utc::now());
        Ok(())
    }
}

fn running_state<'a>(
    runs: &'a mut HashMap<String, RunState>,
    run_id: &RunId,
) -> StorageResult<&'a mut RunState> {
    let state = runs
        .get_mut(&run_id.0)
        .ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.0.clone(),
        })?;
    if state.record.status != RunStatus::Running {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            status: format!("{:?}", state.record.status),
            expected: "Running".to_string(),
        });
    }
    Ok(state)
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run_id.0) {
            return Err(StorageError::DuplicateRun {
                run_id: run_id.0.clone(),
            });
        }
        let record = RunRecord {
            run_id: run_id.clone(),
            metadata,
            status: RunStatus::Running,
            summary: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        runs.insert(
            run_id.0.clone(),
            RunState {
                record,
                events: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = running_state(&mut runs, run_id)?;
        state.events.push(event);
        Ok(())
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Completed, summary)
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Failed, summary)
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|s| s.record.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let runs = self.runs.lock().unwrap();
        let state = runs
            .get(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        let mut events = state.events.clone();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn list_runs(&self, source_branch: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs
            .values()
            .filter(|s| {
                source_branch
                    .map(|b| s.record.metadata.source_branch == b)
                    .unwrap_or(true)
            })
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
