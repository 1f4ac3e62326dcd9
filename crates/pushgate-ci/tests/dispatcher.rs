//! Integration tests for per-pair dispatch: admission, supersession, parallel pairs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pushgate_ci::fakes::{ScriptedExecutor, StepScript};
use pushgate_ci::{Admission, Dispatcher, Pipeline, PipelineConfig};
use pushgate_core::fakes::{MemoryVcs, RecordingNotifier};
use pushgate_core::{BranchPair, CommitRef, PushEvent, RunOutcome};

fn repo(vcs: MemoryVcs, commits: &[&str]) -> Arc<MemoryVcs> {
    for c in commits {
        vcs.commit("new", c);
    }
    Arc::new(vcs)
}

fn pipeline(vcs: Arc<MemoryVcs>, executor: Arc<ScriptedExecutor>) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        &PipelineConfig::default(),
        Path::new("."),
        vcs,
        executor,
        Arc::new(RecordingNotifier::new()),
    ))
}

fn single_pair(vcs: Arc<MemoryVcs>, executor: Arc<ScriptedExecutor>) -> Dispatcher {
    Dispatcher::builder()
        .route(BranchPair::new("new", "main"), pipeline(vcs, executor))
        .build()
}

fn base() -> MemoryVcs {
    MemoryVcs::new()
        .with_branch("main", "base")
        .with_branch("new", "base")
}

#[tokio::test]
async fn push_to_other_branch_is_ignored() {
    let vcs = repo(base(), &["abc123"]);
    let executor = Arc::new(ScriptedExecutor::new());
    let dispatcher = single_pair(vcs.clone(), executor.clone());

    assert_eq!(
        dispatcher.submit(PushEvent::new("feature/x", "abc123")),
        Admission::Ignored
    );
    assert_eq!(
        dispatcher.submit(PushEvent::new("main", "abc123")),
        Admission::Ignored
    );
    dispatcher.wait_idle().await;

    assert!(executor.calls().is_empty());
    assert!(dispatcher.take_finished().is_empty());
    assert_eq!(vcs.tip("main"), Some(CommitRef::new("base")));
}

#[tokio::test]
async fn malformed_event_is_ignored() {
    let dispatcher = single_pair(repo(base(), &[]), Arc::new(ScriptedExecutor::new()));
    assert_eq!(
        dispatcher.submit(PushEvent::new("new", "")),
        Admission::Ignored
    );
}

/// Scenario 4: c1 and c2 arrive while c0 validates; afterwards only c2 runs.
#[tokio::test(start_paused = true)]
async fn queued_push_is_superseded_by_newer_push() {
    let vcs = repo(base(), &["c0", "c1", "c2"]);
    let executor = Arc::new(
        ScriptedExecutor::new().default_script(StepScript::pass().delayed(Duration::from_secs(5))),
    );
    let dispatcher = single_pair(vcs.clone(), executor.clone());

    assert_eq!(dispatcher.submit(PushEvent::new("new", "c0")), Admission::Started);
    assert_eq!(dispatcher.submit(PushEvent::new("new", "c1")), Admission::Queued);
    assert_eq!(
        dispatcher.submit(PushEvent::new("new", "c2")),
        Admission::Superseded {
            replaced: CommitRef::new("c1")
        }
    );
    dispatcher.wait_idle().await;

    assert_eq!(
        executor.commits(),
        vec![CommitRef::new("c0"), CommitRef::new("c2")]
    );
    let finished = dispatcher.take_finished();
    assert_eq!(finished.len(), 2);
    assert!(finished
        .iter()
        .all(|r| r.outcome() == Some(RunOutcome::Promoted)));
    assert_eq!(vcs.tip("main"), Some(CommitRef::new("c2")));
}

#[tokio::test(start_paused = true)]
async fn duplicate_commits_are_not_rerun() {
    let vcs = repo(base(), &["c0", "c1"]);
    let executor = Arc::new(
        ScriptedExecutor::new().default_script(StepScript::pass().delayed(Duration::from_secs(1))),
    );
    let dispatcher = single_pair(vcs, executor.clone());

    assert_eq!(dispatcher.submit(PushEvent::new("new", "c0")), Admission::Started);
    assert_eq!(dispatcher.submit(PushEvent::new("new", "c0")), Admission::Duplicate);
    assert_eq!(dispatcher.submit(PushEvent::new("new", "c1")), Admission::Queued);
    assert_eq!(dispatcher.submit(PushEvent::new("new", "c1")), Admission::Duplicate);
    dispatcher.wait_idle().await;

    assert_eq!(dispatcher.submit(PushEvent::new("new", "c1")), Admission::Duplicate);
    dispatcher.wait_idle().await;
    assert_eq!(
        executor.commits(),
        vec![CommitRef::new("c0"), CommitRef::new("c1")]
    );
}

#[tokio::test]
async fn idle_dispatcher_accepts_new_run_after_completion() {
    let vcs = repo(base(), &["c0", "c1"]);
    let executor = Arc::new(ScriptedExecutor::new());
    let dispatcher = single_pair(vcs.clone(), executor.clone());

    assert_eq!(dispatcher.submit(PushEvent::new("new", "c0")), Admission::Started);
    dispatcher.wait_idle().await;
    assert_eq!(dispatcher.submit(PushEvent::new("new", "c1")), Admission::Started);
    dispatcher.wait_idle().await;

    assert_eq!(dispatcher.take_finished().len(), 2);
    assert_eq!(vcs.tip("main"), Some(CommitRef::new("c1")));
}

#[tokio::test(start_paused = true)]
async fn different_pairs_run_in_parallel() {
    let site = repo(base(), &["s1"]);
    let docs = Arc::new(
        MemoryVcs::new()
            .with_branch("docs", "d0")
            .with_branch("docs-staging", "d0"),
    );
    docs.commit("docs-staging", "d1");

    let executor = Arc::new(
        ScriptedExecutor::new().default_script(StepScript::pass().delayed(Duration::from_secs(2))),
    );
    let dispatcher = Dispatcher::builder()
        .route(BranchPair::new("new", "main"), pipeline(site.clone(), executor.clone()))
        .route(
            BranchPair::new("docs-staging", "docs"),
            pipeline(docs.clone(), executor.clone()),
        )
        .build();

    assert_eq!(dispatcher.submit(PushEvent::new("new", "s1")), Admission::Started);
    assert_eq!(
        dispatcher.submit(PushEvent::new("docs-staging", "d1")),
        Admission::Started
    );
    dispatcher.wait_idle().await;

    assert_eq!(executor.max_in_flight(), 2);
    assert_eq!(site.tip("main"), Some(CommitRef::new("s1")));
    assert_eq!(docs.tip("docs"), Some(CommitRef::new("d1")));
}

#[tokio::test]
async fn blocked_run_does_not_stop_the_queue() {
    let vcs = repo(base(), &["bad", "good"]);
    let executor = Arc::new(
        ScriptedExecutor::new().script_for("bad", "build", StepScript::exit(1, "error")),
    );
    let dispatcher = single_pair(vcs.clone(), executor);

    dispatcher.submit(PushEvent::new("new", "bad"));
    dispatcher.submit(PushEvent::new("new", "good"));
    dispatcher.wait_idle().await;

    let outcomes: Vec<_> = dispatcher
        .take_finished()
        .into_iter()
        .map(|r| (r.commit().clone(), r.outcome()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (CommitRef::new("bad"), Some(RunOutcome::Blocked)),
            (CommitRef::new("good"), Some(RunOutcome::Promoted)),
        ]
    );
    assert_eq!(vcs.tip("main"), Some(CommitRef::new("good")));
}
