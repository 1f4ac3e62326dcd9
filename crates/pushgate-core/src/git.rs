//! Git integration over the `git` command line.
//!
//! [`GitCli`] implements [`VersionControl`] for a local clone. Every command
//! runs with `kill_on_drop` under a timeout, so a hung remote cannot stall
//! the pipeline past the configured limit.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{CommitRef, MergeKind};
use crate::vcs::{MergeOutcome, PushOutcome, VcsError, VersionControl};

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Untracked paths that survive the clean after each checkout: the local
/// run ledger directory and the configuration file.
pub const CLEAN_EXCLUDES: &[&str] = &[".pushgate", "pushgate.toml"];

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// [`VersionControl`] backed by a local clone and the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
    remote: String,
    timeout: Duration,
    committer_name: String,
    committer_email: String,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: remote.into(),
            timeout: Duration::from_secs(120),
            committer_name: "pushgate".to_string(),
            committer_email: "pushgate@localhost".to_string(),
        }
    }

    /// Bound every git invocation to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn exec(&self, args: &[&str]) -> Result<GitOutput, VcsError> {
        debug!(repo = %self.repo_dir.display(), ?args, "git");
        let child = tokio::process::Command::new("git")
            .arg("-c")
            .arg(format!("user.name={}", self.committer_name))
            .arg("-c")
            .arg(format!("user.email={}", self.committer_email))
            .args(args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| VcsError::Timeout(self.timeout.as_secs()))??;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run a command that must succeed; returns trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let out = self.exec(args).await?;
        if !out.success {
            return Err(VcsError::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    async fn rev_parse(&self, rev: &str) -> Result<CommitRef, VcsError> {
        let sha = self.run(&["rev-parse", "--verify", rev]).await?;
        Ok(CommitRef::new(sha))
    }

    async fn has_commit(&self, sha: &str) -> Result<bool, VcsError> {
        let spec = format!("{sha}^{{commit}}");
        Ok(self.exec(&["cat-file", "-e", &spec]).await?.success)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, VcsError> {
        let out = self
            .exec(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        Ok(out.success)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn fetch(&self, branch: &str) -> Result<CommitRef, VcsError> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{}/{branch}", self.remote);
        let out = self.exec(&["fetch", "--quiet", &self.remote, &refspec]).await?;
        if !out.success {
            if out.stderr.contains("couldn't find remote ref") {
                return Err(VcsError::BranchNotFound(branch.to_string()));
            }
            return Err(VcsError::Command {
                command: "fetch".to_string(),
                stderr: out.stderr,
            });
        }
        self.rev_parse(&format!("refs/remotes/{}/{branch}", self.remote))
            .await
    }

    async fn checkout(&self, commit: &CommitRef) -> Result<(), VcsError> {
        if !self.has_commit(commit.as_str()).await? {
            self.run(&["fetch", "--quiet", &self.remote]).await?;
            if !self.has_commit(commit.as_str()).await? {
                return Err(VcsError::CommitNotFound(commit.to_string()));
            }
        }
        self.run(&["checkout", "--quiet", "--force", "--detach", commit.as_str()])
            .await?;
        let mut clean = vec!["clean", "-fdq"];
        for path in CLEAN_EXCLUDES {
            clean.extend(["-e", path]);
        }
        self.run(&clean).await?;
        Ok(())
    }

    async fn merge(
        &self,
        target: &CommitRef,
        source: &CommitRef,
        message: &str,
    ) -> Result<MergeOutcome, VcsError> {
        for commit in [target, source] {
            if !self.has_commit(commit.as_str()).await? {
                return Err(VcsError::CommitNotFound(commit.to_string()));
            }
        }

        if self.is_ancestor(source.as_str(), target.as_str()).await? {
            return Ok(MergeOutcome::Merged {
                new_ref: target.clone(),
                kind: MergeKind::UpToDate,
            });
        }
        if self.is_ancestor(target.as_str(), source.as_str()).await? {
            return Ok(MergeOutcome::Merged {
                new_ref: source.clone(),
                kind: MergeKind::FastForward,
            });
        }

        self.run(&["checkout", "--quiet", "--force", "--detach", target.as_str()])
            .await?;
        let out = self
            .exec(&["merge", "--no-ff", "--no-edit", "-m", message, source.as_str()])
            .await?;
        if out.success {
            let new_ref = self.rev_parse("HEAD").await?;
            return Ok(MergeOutcome::Merged {
                new_ref,
                kind: MergeKind::MergeCommit,
            });
        }

        let unmerged = self
            .exec(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let paths: Vec<String> = unmerged
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        // Leave the tree clean for the next attempt.
        let _ = self.exec(&["merge", "--abort"]).await;
        if paths.is_empty() {
            return Err(VcsError::Command {
                command: "merge".to_string(),
                stderr: out.stderr,
            });
        }
        Ok(MergeOutcome::Conflict { paths })
    }

    async fn push(&self, branch: &str, new_ref: &CommitRef) -> Result<PushOutcome, VcsError> {
        let refspec = format!("{}:refs/heads/{branch}", new_ref.as_str());
        let out = self
            .exec(&["push", "--porcelain", &self.remote, &refspec])
            .await?;
        if out.success {
            return Ok(PushOutcome::Pushed);
        }

        let combined = format!("{}\n{}", out.stdout, out.stderr);
        if combined.contains("[rejected]")
            || combined.contains("non-fast-forward")
            || combined.contains("fetch first")
        {
            let reason = combined
                .lines()
                .find(|l| l.contains("rejected"))
                .unwrap_or("non-fast-forward")
                .trim()
                .to_string();
            return Ok(PushOutcome::Rejected { reason });
        }
        Err(VcsError::Command {
            command: "push".to_string(),
            stderr: out.stderr,
        })
    }

    async fn changed_paths(
        &self,
        from: &CommitRef,
        to: &CommitRef,
    ) -> Result<Vec<String>, VcsError> {
        let out = self
            .run(&["diff", "--name-only", from.as_str(), to.as_str()])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit_file(repo: &Path, file: &str, contents: &str, msg: &str) -> String {
        std::fs::write(repo.join(file), contents).unwrap();
        run_git(repo, &["add", file]);
        run_git(repo, &["commit", "-q", "-m", msg]);
        run_git(repo, &["rev-parse", "HEAD"])
    }

    struct Fixture {
        _remote: tempfile::TempDir,
        seed: tempfile::TempDir,
        _work: tempfile::TempDir,
        git: GitCli,
    }

    /// Bare remote with `main` (a.txt) and `new` (a.txt + b.txt), a seed
    /// clone for simulating other pushers, and a work clone for GitCli.
    fn fixture() -> Fixture {
        let remote = tempfile::tempdir().unwrap();
        run_git(remote.path(), &["init", "-q", "--bare"]);

        let seed = tempfile::tempdir().unwrap();
        let s = seed.path();
        run_git(s, &["init", "-q"]);
        run_git(s, &["config", "user.name", "test-user"]);
        run_git(s, &["config", "user.email", "test@example.com"]);
        run_git(s, &["checkout", "-q", "-b", "main"]);
        commit_file(s, "a.txt", "one\n", "initial");
        run_git(s, &["remote", "add", "origin", remote.path().to_str().unwrap()]);
        run_git(s, &["push", "-q", "origin", "main"]);
        run_git(s, &["checkout", "-q", "-b", "new"]);
        commit_file(s, "b.txt", "feature\n", "add b");
        run_git(s, &["push", "-q", "origin", "new"]);

        let work = tempfile::tempdir().unwrap();
        run_git(
            work.path(),
            &["clone", "-q", remote.path().to_str().unwrap(), "."],
        );

        let git = GitCli::new(work.path(), "origin").with_timeout(Duration::from_secs(30));
        Fixture {
            _remote: remote,
            seed,
            _work: work,
            git,
        }
    }

    fn seed_push_main(seed: &Path, file: &str, contents: &str) -> String {
        run_git(seed, &["checkout", "-q", "main"]);
        let sha = commit_file(seed, file, contents, "concurrent change");
        run_git(seed, &["push", "-q", "origin", "main"]);
        sha
    }

    #[test]
    fn is_git_repo_false_for_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(dir.path()));
    }

    #[tokio::test]
    async fn fetch_returns_remote_tip() {
        let fx = fixture();
        let expected = run_git(fx.seed.path(), &["rev-parse", "new"]);
        let tip = fx.git.fetch("new").await.unwrap();
        assert_eq!(tip.as_str(), expected);
        assert!(is_git_repo(fx.git.repo_dir()));
    }

    #[tokio::test]
    async fn fetch_missing_branch_is_branch_not_found() {
        let fx = fixture();
        let err = fx.git.fetch("does-not-exist").await.unwrap_err();
        assert!(matches!(err, VcsError::BranchNotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn checkout_detaches_at_commit() {
        let fx = fixture();
        let tip = fx.git.fetch("new").await.unwrap();
        fx.git.checkout(&tip).await.unwrap();
        let head = run_git(fx.git.repo_dir(), &["rev-parse", "HEAD"]);
        assert_eq!(head, tip.as_str());
        assert!(fx.git.repo_dir().join("b.txt").exists());
    }

    #[tokio::test]
    async fn checkout_keeps_ledger_and_config_but_cleans_the_rest() {
        let fx = fixture();
        let repo = fx.git.repo_dir();
        std::fs::create_dir_all(repo.join(".pushgate/db")).unwrap();
        std::fs::write(repo.join(".pushgate/db/data"), "ledger").unwrap();
        std::fs::write(repo.join("pushgate.toml"), "channel = \"#ops\"\n").unwrap();
        std::fs::write(repo.join("stray.log"), "build output").unwrap();

        let tip = fx.git.fetch("new").await.unwrap();
        fx.git.checkout(&tip).await.unwrap();

        assert!(repo.join(".pushgate/db/data").exists());
        assert!(repo.join("pushgate.toml").exists());
        assert!(!repo.join("stray.log").exists());
    }

    #[tokio::test]
    async fn checkout_unknown_commit_fails() {
        let fx = fixture();
        let err = fx
            .git
            .checkout(&CommitRef::new("0123456789abcdef0123456789abcdef01234567"))
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::CommitNotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn fast_forward_merge_and_push() {
        let fx = fixture();
        let main = fx.git.fetch("main").await.unwrap();
        let new = fx.git.fetch("new").await.unwrap();

        let outcome = fx.git.merge(&main, &new, "promote").await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                new_ref: new.clone(),
                kind: MergeKind::FastForward
            }
        );
        assert_eq!(fx.git.push("main", &new).await.unwrap(), PushOutcome::Pushed);
        assert_eq!(fx.git.fetch("main").await.unwrap(), new);

        let paths = fx.git.changed_paths(&main, &new).await.unwrap();
        assert_eq!(paths, vec!["b.txt".to_string()]);
    }

    #[tokio::test]
    async fn already_merged_commit_is_up_to_date() {
        let fx = fixture();
        let main = fx.git.fetch("main").await.unwrap();
        let outcome = fx.git.merge(&main, &main, "promote").await.unwrap();
        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                kind: MergeKind::UpToDate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn diverged_target_gets_merge_commit() {
        let fx = fixture();
        seed_push_main(fx.seed.path(), "c.txt", "other\n");
        let main = fx.git.fetch("main").await.unwrap();
        let new = fx.git.fetch("new").await.unwrap();

        let outcome = fx.git.merge(&main, &new, "promote new").await.unwrap();
        let MergeOutcome::Merged { new_ref, kind } = outcome else {
            panic!("expected merge, got {outcome:?}");
        };
        assert_eq!(kind, MergeKind::MergeCommit);
        assert_eq!(fx.git.push("main", &new_ref).await.unwrap(), PushOutcome::Pushed);

        let parents = run_git(
            fx.git.repo_dir(),
            &["rev-list", "--parents", "-n", "1", new_ref.as_str()],
        );
        assert!(parents.contains(new.as_str()));
        assert!(parents.contains(main.as_str()));
    }

    #[tokio::test]
    async fn conflicting_change_reports_paths() {
        let fx = fixture();
        run_git(fx.seed.path(), &["checkout", "-q", "new"]);
        commit_file(fx.seed.path(), "a.txt", "from new\n", "edit a on new");
        run_git(fx.seed.path(), &["push", "-q", "origin", "new"]);
        seed_push_main(fx.seed.path(), "a.txt", "from main\n");

        let main = fx.git.fetch("main").await.unwrap();
        let new = fx.git.fetch("new").await.unwrap();
        let outcome = fx.git.merge(&main, &new, "promote").await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Conflict {
                paths: vec!["a.txt".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn push_rejected_when_target_moved() {
        let fx = fixture();
        let stale_main = fx.git.fetch("main").await.unwrap();
        let new = fx.git.fetch("new").await.unwrap();
        let outcome = fx.git.merge(&stale_main, &new, "promote").await.unwrap();
        let MergeOutcome::Merged { new_ref, .. } = outcome else {
            panic!("expected merge");
        };

        seed_push_main(fx.seed.path(), "c.txt", "raced\n");

        let pushed = fx.git.push("main", &new_ref).await.unwrap();
        assert!(matches!(pushed, PushOutcome::Rejected { .. }), "got {pushed:?}");
    }
}
