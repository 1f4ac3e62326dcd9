//! Promotion stage: merge the validated commit into the target and push.
//!
//! The commit merged is always the one validation ran against. The source
//! branch is fetched only to log how far it has moved since.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pushgate_core::{
    emit_promotion_attempt, CommitRef, FailureReport, MergeKind, MergeOutcome, PipelineRun,
    PromotionRecord, PushOutcome, RunEventKind, VcsError, VersionControl,
};
use tracing::{info, warn};

use crate::journal::Journal;

/// Retry policy for the merge-and-push cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionPolicy {
    /// Total cycles, including the first. Always at least 1.
    pub attempts: u32,

    /// Fixed pause between cycles.
    pub retry_delay: Duration,

    /// Bound on each individual VCS operation.
    pub vcs_timeout: Duration,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            retry_delay: Duration::ZERO,
            vcs_timeout: Duration::from_secs(120),
        }
    }
}

enum Attempt {
    Landed {
        previous: CommitRef,
        new_target: CommitRef,
        kind: MergeKind,
    },
    Retry(String),
}

pub struct PromotionStage {
    vcs: Arc<dyn VersionControl>,
    policy: PromotionPolicy,
}

impl PromotionStage {
    pub fn new(vcs: Arc<dyn VersionControl>, policy: PromotionPolicy) -> Self {
        Self { vcs, policy }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, VcsError>>,
    ) -> Result<T, VcsError> {
        tokio::time::timeout(self.policy.vcs_timeout, op)
            .await
            .map_err(|_| VcsError::Timeout(self.policy.vcs_timeout.as_secs()))?
    }

    /// Promote the validated commit of `run`.
    ///
    /// Returns the promotion record, or a `promotion_conflict` report once
    /// every attempt has failed.
    pub async fn run(
        &self,
        run: &PipelineRun,
        journal: &Journal,
    ) -> Result<PromotionRecord, FailureReport> {
        let commit = run.commit();
        let pair = run.pair();

        match self.bounded(self.vcs.fetch(&pair.source)).await {
            Ok(tip) if &tip != commit => {
                info!(source = %pair.source, tip = %tip.short(), validated = %commit.short(),
                    "source branch moved since validation; promoting the validated commit");
            }
            Ok(_) => {}
            Err(e) => warn!(source = %pair.source, error = %e, "could not fetch source branch"),
        }

        let message = format!(
            "Promote {} from {} into {}\n\nValidated by pushgate run {}",
            commit.short(),
            pair.source,
            pair.target,
            run.run_id()
        );
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = self.attempt(&pair.target, commit, &message).await;
            let succeeded = matches!(result, Ok(Attempt::Landed { .. }));
            let label = match &result {
                Ok(Attempt::Landed { kind, .. }) => match kind {
                    MergeKind::FastForward => "fast_forward",
                    MergeKind::MergeCommit => "merge_commit",
                    MergeKind::UpToDate => "up_to_date",
                },
                Ok(Attempt::Retry(_)) => "rejected",
                Err(_) => "error",
            };
            emit_promotion_attempt(attempt, attempts, label);
            journal
                .record(RunEventKind::PromotionAttempt { attempt, succeeded })
                .await;

            match result {
                Ok(Attempt::Landed {
                    previous,
                    new_target,
                    kind,
                }) => {
                    let changed_paths = self
                        .bounded(self.vcs.changed_paths(&previous, &new_target))
                        .await
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "could not list changed paths");
                            Vec::new()
                        });
                    return Ok(PromotionRecord::new(
                        run.run_id(),
                        commit.clone(),
                        pair.clone(),
                        previous,
                        new_target,
                        kind,
                        changed_paths,
                        attempt,
                    ));
                }
                Ok(Attempt::Retry(reason)) => last_error = reason,
                Err(e) => last_error = e.to_string(),
            }
            warn!(attempt, max_attempts = attempts, error = %last_error, "promotion attempt failed");

            if attempt < attempts && !self.policy.retry_delay.is_zero() {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(FailureReport::promotion_conflict(
            run.run_id(),
            commit.clone(),
            pair.clone(),
            attempts,
            &last_error,
        ))
    }

    /// One fetch, merge, push cycle against the current target tip.
    async fn attempt(
        &self,
        target: &str,
        commit: &CommitRef,
        message: &str,
    ) -> Result<Attempt, VcsError> {
        let previous = self.bounded(self.vcs.fetch(target)).await?;
        let merged = self
            .bounded(self.vcs.merge(&previous, commit, message))
            .await?;

        let (new_target, kind) = match merged {
            MergeOutcome::Merged { new_ref, kind } => (new_ref, kind),
            MergeOutcome::Conflict { paths } => {
                return Ok(Attempt::Retry(format!(
                    "merge conflict in: {}",
                    paths.join(", ")
                )));
            }
        };

        if kind != MergeKind::UpToDate {
            match self.bounded(self.vcs.push(target, &new_target)).await? {
                PushOutcome::Pushed => {}
                PushOutcome::Rejected { reason } => {
                    return Ok(Attempt::Retry(format!("push rejected: {reason}")));
                }
            }
        }

        Ok(Attempt::Landed {
            previous,
            new_target,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushgate_core::fakes::MemoryVcs;
    use pushgate_core::{FailureCategory, PushEvent, ValidationResult};

    fn promoting_run(commit: &str) -> PipelineRun {
        let mut run = PipelineRun::new(&PushEvent::new("new", commit), "main");
        run.begin_validation().unwrap();
        run.record_validation(ValidationResult::from_steps(vec![]))
            .unwrap();
        run
    }

    fn repo() -> Arc<MemoryVcs> {
        let vcs = MemoryVcs::new()
            .with_branch("main", "base")
            .with_branch("new", "base");
        vcs.commit_touching("new", "abc123", &["src/index.js"]);
        Arc::new(vcs)
    }

    fn journal() -> Journal {
        Journal::detached("test-run")
    }

    #[tokio::test]
    async fn fast_forwards_target_to_validated_commit() {
        let vcs = repo();
        let stage = PromotionStage::new(vcs.clone(), PromotionPolicy::default());

        let record = stage.run(&promoting_run("abc123"), &journal()).await.unwrap();
        assert_eq!(record.commit, CommitRef::new("abc123"));
        assert_eq!(record.previous_target, CommitRef::new("base"));
        assert_eq!(record.new_target, CommitRef::new("abc123"));
        assert_eq!(record.merge_kind, MergeKind::FastForward);
        assert_eq!(record.changed_paths, vec!["src/index.js".to_string()]);
        assert_eq!(record.attempts, 1);
        assert!(vcs.contains("main", "abc123"));
    }

    #[tokio::test]
    async fn merges_validated_commit_not_newer_source_tip() {
        let vcs = repo();
        vcs.commit("new", "newer");
        let stage = PromotionStage::new(vcs.clone(), PromotionPolicy::default());

        let record = stage.run(&promoting_run("abc123"), &journal()).await.unwrap();
        assert_eq!(record.commit, CommitRef::new("abc123"));
        assert!(vcs.contains("main", "abc123"));
        assert!(!vcs.contains("main", "newer"));
        assert_eq!(vcs.merges()[0].1, CommitRef::new("abc123"));
    }

    #[tokio::test]
    async fn retries_after_target_moves_during_push() {
        let vcs = repo();
        vcs.race_next_push("main", "hotfix");
        let stage = PromotionStage::new(vcs.clone(), PromotionPolicy::default());

        let record = stage.run(&promoting_run("abc123"), &journal()).await.unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.merge_kind, MergeKind::MergeCommit);
        assert_eq!(record.previous_target, CommitRef::new("hotfix"));
        assert!(vcs.contains("main", "abc123"));
        assert!(vcs.contains("main", "hotfix"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn each_attempt_is_logged() {
        let vcs = repo();
        vcs.reject_next_pushes(1);
        let stage = PromotionStage::new(vcs, PromotionPolicy::default());

        stage.run(&promoting_run("abc123"), &journal()).await.unwrap();
        assert!(logs_contain("promotion.attempt"));
        assert!(logs_contain("attempt=1"));
        assert!(logs_contain("attempt=2"));
    }

    #[tokio::test]
    async fn exhausted_attempts_yield_promotion_conflict() {
        let vcs = repo();
        vcs.reject_next_pushes(2);
        let stage = PromotionStage::new(vcs.clone(), PromotionPolicy::default());

        let report = stage.run(&promoting_run("abc123"), &journal()).await.unwrap_err();
        assert_eq!(report.category, FailureCategory::PromotionConflict);
        assert!(report.message.contains("2 attempt(s)"));
        assert_eq!(vcs.tip("main"), Some(CommitRef::new("base")));
    }

    #[tokio::test]
    async fn merge_conflict_is_retried_then_reported() {
        let vcs = repo();
        vcs.commit("main", "diverged");
        vcs.conflict_on("abc123");
        let policy = PromotionPolicy {
            attempts: 3,
            ..PromotionPolicy::default()
        };
        let stage = PromotionStage::new(vcs.clone(), policy);

        let report = stage.run(&promoting_run("abc123"), &journal()).await.unwrap_err();
        assert!(report.excerpt.text.contains("src/index.js"));
        assert_eq!(vcs.merges().len(), 3);
    }

    #[tokio::test]
    async fn already_contained_commit_is_up_to_date_without_push() {
        let vcs = repo();
        let stage = PromotionStage::new(vcs.clone(), PromotionPolicy::default());

        let record = stage.run(&promoting_run("base"), &journal()).await.unwrap();
        assert_eq!(record.merge_kind, MergeKind::UpToDate);
        assert!(vcs.pushes().is_empty());
    }
}
