//! Integration tests for RunRecorder (run lifecycle → RunLedger).

use std::sync::Arc;

use pushgate_core::domain::{
    CommitRef, FailureReport, MergeKind, OutputExcerpt, PromotionRecord, PushEvent, RunEventKind,
    RunStage, StepResult, ValidationResult,
};
use pushgate_core::{PipelineRun, RunRecorder};
use pushgate_state::{fakes::MemoryRunLedger, RunId, RunLedger, RunOutcome, RunStatus};

fn step(name: &str, exit_code: i32) -> StepResult {
    StepResult {
        name: name.to_string(),
        exit_code,
        output: OutputExcerpt::capture("npm ERR! test failed", 40, 8192),
        duration_ms: 3,
        timed_out: false,
    }
}

fn started_run(commit: &str) -> PipelineRun {
    let mut run = PipelineRun::new(&PushEvent::new("new", commit), "main");
    run.begin_validation().expect("begin validation");
    run
}

#[tokio::test]
async fn promoted_run_is_completed_with_record() {
    let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
    let mut run = started_run("abc123");
    let recorder = RunRecorder::start(ledger.clone(), &run, serde_json::json!({"steps": 3}))
        .await
        .expect("start");

    recorder
        .record(&RunEventKind::StageChanged {
            from: RunStage::Pending,
            to: RunStage::Validating,
        })
        .await
        .expect("record");
    recorder
        .record(&RunEventKind::StepFinished {
            step: "build".to_string(),
            passed: true,
        })
        .await
        .expect("record");

    run.record_validation(ValidationResult::from_steps(vec![step("build", 0)]))
        .expect("validation");
    let record = PromotionRecord::new(
        run.run_id(),
        run.commit().clone(),
        run.pair().clone(),
        CommitRef::new("base"),
        run.commit().clone(),
        MergeKind::FastForward,
        vec![],
        1,
    );
    run.complete_promotion(record).expect("promote");

    let run_id = recorder.run_id().clone();
    recorder.finish(&run, 42).await.expect("finish");

    let stored = ledger.get_run(&run_id).await.expect("get run");
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.metadata.commit, "abc123");
    assert_eq!(stored.metadata.target_branch, "main");
    let summary = stored.summary.expect("summary");
    assert_eq!(summary.outcome, RunOutcome::Promoted);
    assert_eq!(summary.total_events, 2);
    assert_eq!(summary.report["outcome"], "promoted");

    let events = ledger.get_events(&run_id).await.expect("events");
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(events[0].kind, "stage_changed");
    assert_eq!(events[1].payload["step"], "build");
}

#[tokio::test]
async fn blocked_after_validation_is_completed_not_failed() {
    let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
    let mut run = started_run("def456");
    let recorder = RunRecorder::start(ledger.clone(), &run, serde_json::json!({}))
        .await
        .expect("start");

    run.record_validation(ValidationResult::from_steps(vec![step("test", 1)]))
        .expect("validation");
    let failing = run.validation().and_then(|v| v.failing_step()).cloned().expect("failing");
    run.complete_blocked(FailureReport::validation_failed(
        run.run_id(),
        run.commit().clone(),
        run.pair().clone(),
        &failing,
    ))
    .expect("blocked");

    let run_id = recorder.run_id().clone();
    recorder.finish(&run, 10).await.expect("finish");

    let stored = ledger.get_run(&run_id).await.expect("get run");
    assert_eq!(stored.status, RunStatus::Completed);
    let summary = stored.summary.expect("summary");
    assert_eq!(summary.outcome, RunOutcome::Blocked);
    assert_eq!(summary.report["failing_step"], "test");
}

#[tokio::test]
async fn promotion_conflict_is_failed() {
    let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
    let mut run = started_run("ghi789");
    let recorder = RunRecorder::start(ledger.clone(), &run, serde_json::json!({}))
        .await
        .expect("start");

    run.record_validation(ValidationResult::from_steps(vec![]))
        .expect("validation");
    run.fail_promotion(FailureReport::promotion_conflict(
        run.run_id(),
        run.commit().clone(),
        run.pair().clone(),
        2,
        "non-fast-forward",
    ))
    .expect("fail promotion");

    let run_id = recorder.run_id().clone();
    recorder.finish(&run, 10).await.expect("finish");

    let stored = ledger.get_run(&run_id).await.expect("get run");
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.summary.expect("summary").outcome, RunOutcome::Blocked);
}

#[tokio::test]
async fn finishing_a_non_terminal_run_is_rejected() {
    let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
    let run = started_run("abc123");
    let recorder = RunRecorder::start(ledger.clone(), &run, serde_json::json!({}))
        .await
        .expect("start");
    let run_id: RunId = recorder.run_id().clone();

    assert!(recorder.finish(&run, 1).await.is_err());
    let stored = ledger.get_run(&run_id).await.expect("get run");
    assert_eq!(stored.status, RunStatus::Running);
}

#[tokio::test]
async fn same_run_cannot_be_started_twice() {
    let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
    let run = started_run("abc123");
    RunRecorder::start(ledger.clone(), &run, serde_json::json!({}))
        .await
        .expect("first start");
    assert!(RunRecorder::start(ledger, &run, serde_json::json!({}))
        .await
        .is_err());
}
