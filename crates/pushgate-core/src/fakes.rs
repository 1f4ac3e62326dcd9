//! In-memory fakes for the pipeline capabilities (testing only)
//!
//! - `MemoryVcs`: a commit graph with branches, scripted push rejections and
//!   merge conflicts
//! - `RecordingNotifier`: keeps every posted message
//! - `FailingNotifier`: rejects every post

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CommitRef, MergeKind};
use crate::notify::{NotifyError, Notifier};
use crate::vcs::{MergeOutcome, PushOutcome, VcsError, VersionControl};

#[derive(Debug, Default)]
struct VcsState {
    parents: HashMap<String, Vec<String>>,
    touched: HashMap<String, Vec<String>>,
    branches: HashMap<String, String>,
    reject_pushes: u32,
    races: VecDeque<(String, String)>,
    conflicts: HashSet<String>,
    unreachable: HashSet<String>,
    merge_seq: u32,
    checkouts: Vec<CommitRef>,
    merges: Vec<(CommitRef, CommitRef)>,
    pushes: Vec<(String, CommitRef)>,
}

impl VcsState {
    fn add_commit(&mut self, sha: &str, parents: Vec<String>, paths: Vec<String>) {
        self.parents.insert(sha.to_string(), parents);
        self.touched.insert(sha.to_string(), paths);
    }

    fn commit_on(&mut self, branch: &str, sha: &str, paths: Vec<String>) {
        let parents = self.branches.get(branch).cloned().into_iter().collect();
        self.add_commit(sha, parents, paths);
        self.branches.insert(branch.to_string(), sha.to_string());
    }

    fn reachable(&self, from: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from.to_string()]);
        while let Some(sha) = queue.pop_front() {
            if !seen.insert(sha.clone()) {
                continue;
            }
            if let Some(parents) = self.parents.get(&sha) {
                queue.extend(parents.iter().cloned());
            }
        }
        seen
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.reachable(descendant).contains(ancestor)
    }

    fn known(&self, commit: &CommitRef) -> Result<(), VcsError> {
        if self.parents.contains_key(commit.as_str()) {
            Ok(())
        } else {
            Err(VcsError::CommitNotFound(commit.to_string()))
        }
    }
}

/// In-memory [`VersionControl`] over a small commit graph.
///
/// Pushes follow git's rule: a branch only moves to a descendant of its
/// current tip; anything else is rejected.
#[derive(Debug, Default)]
pub struct MemoryVcs {
    state: Mutex<VcsState>,
}

impl MemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: create `branch` pointing at a new root commit `sha`, or at
    /// `sha` if it already exists.
    pub fn with_branch(self, branch: &str, sha: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if !state.parents.contains_key(sha) {
                state.add_commit(sha, Vec::new(), Vec::new());
            }
            state.branches.insert(branch.to_string(), sha.to_string());
        }
        self
    }

    /// Add commit `sha` on top of `branch`.
    pub fn commit(&self, branch: &str, sha: &str) -> CommitRef {
        self.commit_touching(branch, sha, &[])
    }

    /// Add commit `sha` on top of `branch`, recording the paths it changes.
    pub fn commit_touching(&self, branch: &str, sha: &str, paths: &[&str]) -> CommitRef {
        let mut state = self.state.lock().unwrap();
        state.commit_on(branch, sha, paths.iter().map(|p| p.to_string()).collect());
        CommitRef::new(sha)
    }

    /// The next `n` pushes are rejected regardless of ancestry.
    pub fn reject_next_pushes(&self, n: u32) {
        self.state.lock().unwrap().reject_pushes = n;
    }

    /// Right before the next push, another writer lands `sha` on `branch`.
    pub fn race_next_push(&self, branch: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .races
            .push_back((branch.to_string(), sha.to_string()));
    }

    /// Non-fast-forward merges of `source` report a conflict.
    pub fn conflict_on(&self, source: &str) {
        self.state
            .lock()
            .unwrap()
            .conflicts
            .insert(source.to_string());
    }

    /// Checking out `sha` fails as if the commit could not be fetched.
    pub fn fail_checkout(&self, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(sha.to_string());
    }

    pub fn tip(&self, branch: &str) -> Option<CommitRef> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .map(|s| CommitRef::new(s.clone()))
    }

    /// Whether `branch` contains `sha` in its history.
    pub fn contains(&self, branch: &str, sha: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(branch)
            .is_some_and(|tip| state.is_ancestor(sha, tip))
    }

    pub fn checkouts(&self) -> Vec<CommitRef> {
        self.state.lock().unwrap().checkouts.clone()
    }

    /// `(target, source)` pairs passed to `merge`.
    pub fn merges(&self) -> Vec<(CommitRef, CommitRef)> {
        self.state.lock().unwrap().merges.clone()
    }

    /// Successful pushes as `(branch, new_ref)`.
    pub fn pushes(&self) -> Vec<(String, CommitRef)> {
        self.state.lock().unwrap().pushes.clone()
    }
}

#[async_trait]
impl VersionControl for MemoryVcs {
    async fn fetch(&self, branch: &str) -> Result<CommitRef, VcsError> {
        self.tip(branch)
            .ok_or_else(|| VcsError::BranchNotFound(branch.to_string()))
    }

    async fn checkout(&self, commit: &CommitRef) -> Result<(), VcsError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.contains(commit.as_str()) {
            return Err(VcsError::CommitNotFound(commit.to_string()));
        }
        state.known(commit)?;
        state.checkouts.push(commit.clone());
        Ok(())
    }

    async fn merge(
        &self,
        target: &CommitRef,
        source: &CommitRef,
        _message: &str,
    ) -> Result<MergeOutcome, VcsError> {
        let mut state = self.state.lock().unwrap();
        state.known(target)?;
        state.known(source)?;
        state.merges.push((target.clone(), source.clone()));

        if state.is_ancestor(source.as_str(), target.as_str()) {
            return Ok(MergeOutcome::Merged {
                new_ref: target.clone(),
                kind: MergeKind::UpToDate,
            });
        }
        if state.is_ancestor(target.as_str(), source.as_str()) {
            return Ok(MergeOutcome::Merged {
                new_ref: source.clone(),
                kind: MergeKind::FastForward,
            });
        }
        if state.conflicts.contains(source.as_str()) {
            let mut paths = state
                .touched
                .get(source.as_str())
                .cloned()
                .unwrap_or_default();
            if paths.is_empty() {
                paths.push("<unknown>".to_string());
            }
            return Ok(MergeOutcome::Conflict { paths });
        }

        state.merge_seq += 1;
        let sha = format!("merge-{}", state.merge_seq);
        state.add_commit(
            &sha,
            vec![target.to_string(), source.to_string()],
            Vec::new(),
        );
        Ok(MergeOutcome::Merged {
            new_ref: CommitRef::new(sha),
            kind: MergeKind::MergeCommit,
        })
    }

    async fn push(&self, branch: &str, new_ref: &CommitRef) -> Result<PushOutcome, VcsError> {
        let mut state = self.state.lock().unwrap();
        state.known(new_ref)?;

        if let Some((race_branch, race_sha)) = state.races.pop_front() {
            state.commit_on(&race_branch, &race_sha, Vec::new());
        }
        if state.reject_pushes > 0 {
            state.reject_pushes -= 1;
            return Ok(PushOutcome::Rejected {
                reason: "remote rejected the update".to_string(),
            });
        }

        if let Some(tip) = state.branches.get(branch) {
            if !state.is_ancestor(tip, new_ref.as_str()) {
                return Ok(PushOutcome::Rejected {
                    reason: format!("{branch} -> {branch} (non-fast-forward)"),
                });
            }
        }
        state
            .branches
            .insert(branch.to_string(), new_ref.to_string());
        state.pushes.push((branch.to_string(), new_ref.clone()));
        Ok(PushOutcome::Pushed)
    }

    async fn changed_paths(
        &self,
        from: &CommitRef,
        to: &CommitRef,
    ) -> Result<Vec<String>, VcsError> {
        let state = self.state.lock().unwrap();
        let base = state.reachable(from.as_str());
        let mut paths: Vec<String> = state
            .reachable(to.as_str())
            .difference(&base)
            .filter_map(|sha| state.touched.get(sha))
            .flatten()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Keeps every `(channel, message)` posted.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .unwrap()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}

/// Rejects every post with a transport error.
#[derive(Debug, Default)]
pub struct FailingNotifier {
    attempts: AtomicU32,
}

impl FailingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn post(&self, _channel: &str, _message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Transport("connection refused".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> MemoryVcs {
        let vcs = MemoryVcs::new().with_branch("main", "base").with_branch("new", "base");
        vcs.commit_touching("new", "c1", &["src/app.js"]);
        vcs
    }

    #[tokio::test]
    async fn fast_forward_then_push() {
        let vcs = repo();
        let main = vcs.fetch("main").await.unwrap();
        let c1 = CommitRef::new("c1");
        let outcome = vcs.merge(&main, &c1, "promote").await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                new_ref: c1.clone(),
                kind: MergeKind::FastForward
            }
        );
        assert_eq!(vcs.push("main", &c1).await.unwrap(), PushOutcome::Pushed);
        assert_eq!(vcs.tip("main"), Some(c1));
        assert_eq!(
            vcs.changed_paths(&main, &CommitRef::new("c1")).await.unwrap(),
            vec!["src/app.js".to_string()]
        );
    }

    #[tokio::test]
    async fn diverged_target_produces_merge_commit() {
        let vcs = repo();
        vcs.commit("main", "m1");
        let outcome = vcs
            .merge(&CommitRef::new("m1"), &CommitRef::new("c1"), "promote")
            .await
            .unwrap();
        let MergeOutcome::Merged { new_ref, kind } = outcome else {
            panic!("expected merge");
        };
        assert_eq!(kind, MergeKind::MergeCommit);
        vcs.push("main", &new_ref).await.unwrap();
        assert!(vcs.contains("main", "c1"));
        assert!(vcs.contains("main", "m1"));
    }

    #[tokio::test]
    async fn raced_push_is_rejected_as_non_fast_forward() {
        let vcs = repo();
        vcs.race_next_push("main", "m1");
        let pushed = vcs.push("main", &CommitRef::new("c1")).await.unwrap();
        assert!(matches!(pushed, PushOutcome::Rejected { .. }));
        assert_eq!(vcs.tip("main"), Some(CommitRef::new("m1")));
        assert!(vcs.pushes().is_empty());
    }

    #[tokio::test]
    async fn scripted_conflict_on_diverged_merge() {
        let vcs = repo();
        vcs.commit("main", "m1");
        vcs.conflict_on("c1");
        let outcome = vcs
            .merge(&CommitRef::new("m1"), &CommitRef::new("c1"), "promote")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Conflict {
                paths: vec!["src/app.js".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn unknown_commit_checkout_fails() {
        let vcs = repo();
        vcs.fail_checkout("c1");
        assert!(vcs.checkout(&CommitRef::new("c1")).await.is_err());
        assert!(vcs.checkout(&CommitRef::new("nope")).await.is_err());
        vcs.checkout(&CommitRef::new("base")).await.unwrap();
        assert_eq!(vcs.checkouts(), vec![CommitRef::new("base")]);
    }

    #[tokio::test]
    async fn failing_notifier_counts_attempts() {
        let notifier = FailingNotifier::new();
        assert!(notifier.post("#ci", "x").await.is_err());
        assert_eq!(notifier.attempts(), 1);
    }
}
