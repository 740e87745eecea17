//! Applies validated patches to the shared repository.
//!
//! Every mutation sequence (branch, apply, commit, merge or push) runs under
//! the repository's async lock, so concurrent pipelines never interleave git
//! operations on the same checkout. Failures are reported in the result
//! types rather than returned as errors.

pub mod git;

pub use git::{GitCli, Vcs};

use crate::config::{AgentConfig, BotIdentity};
use crate::errors::VcsError;
use crate::sandbox::worktree::ensure_trailing_newline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyResult {
    pub branch: String,
    pub success: bool,
    pub merged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub rolled_back: bool,
}

impl ApplyResult {
    pub fn failed(branch: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            success: false,
            merged: false,
            commit: None,
            error: Some(error.into()),
            rolled_back: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestResult {
    pub branch: String,
    pub success: bool,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub rolled_back: bool,
}

impl PullRequestResult {
    pub fn failed(
        branch: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            branch: branch.into(),
            success: false,
            title: title.into(),
            description: description.into(),
            commit: None,
            remote: None,
            error: Some(error.into()),
            rolled_back: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Commit on a fresh `agent/fix-<millis>` branch instead of the current one
    pub create_branch: bool,
    /// Merge the branch into trunk after committing
    pub auto_merge: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PrOptions {
    pub title: String,
    pub description: String,
}

/// The change-application seam the orchestrator depends on.
#[async_trait]
pub trait ChangeExecutor: Send + Sync {
    async fn apply_patch(&self, patch: &str, opts: &ApplyOptions) -> ApplyResult;
    async fn create_pull_request(&self, patch: &str, opts: &PrOptions) -> PullRequestResult;
    /// Reset the tree, return to trunk and force-delete `branch`.
    async fn rollback(&self, branch: &str) -> Result<(), VcsError>;
}

static REPO_LOCKS: LazyLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| std::sync::Mutex::new(HashMap::new()));

/// A repository path paired with the async lock guarding its working tree.
///
/// Handles opened for the same path share one lock for the lifetime of the
/// process.
#[derive(Clone)]
pub struct RepoHandle {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl RepoHandle {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path.canonicalize().unwrap_or_else(|_| path.clone());
        let lock = {
            let mut locks = REPO_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key).or_default().clone()
        };
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

static LAST_BRANCH_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Unix millis, bumped past the previous value so names never repeat in-process.
fn next_branch_millis() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let prev = LAST_BRANCH_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}

/// Git-backed implementation of [`ChangeExecutor`].
pub struct Executor {
    vcs: Arc<dyn Vcs>,
    repo: RepoHandle,
    identity: BotIdentity,
    trunk: String,
    remote: String,
    branch_prefix: String,
    rollback_on_failure: bool,
}

impl Executor {
    pub fn new(vcs: Arc<dyn Vcs>, repo: RepoHandle, config: &AgentConfig) -> Self {
        Self {
            vcs,
            repo,
            identity: config.identity.clone(),
            trunk: config.repository.trunk.clone(),
            remote: config.repository.remote.clone(),
            branch_prefix: config.repository.branch_prefix.clone(),
            rollback_on_failure: config.repository.rollback_on_failure,
        }
    }

    /// Executor over the git checkout at `path` using the `git` CLI.
    pub fn for_repo(path: impl Into<PathBuf>, config: &AgentConfig) -> Self {
        let repo = RepoHandle::open(path);
        let vcs = Arc::new(GitCli::new(repo.path()));
        Self::new(vcs, repo, config)
    }

    pub fn next_branch_name(&self) -> String {
        format!("{}{}", self.branch_prefix, next_branch_millis())
    }

    /// Check out a new branch (or stay on the current one), apply the patch
    /// and commit it. Records the created branch in `created` as soon as it
    /// exists so the caller can undo it.
    async fn branch_and_commit(
        &self,
        patch: &str,
        message: &str,
        create_branch: bool,
        created: &mut Option<String>,
    ) -> Result<(String, String), VcsError> {
        if patch.trim().is_empty() {
            return Err(VcsError::EmptyPatch);
        }
        if !self.vcs.is_clean().await? {
            return Err(VcsError::DirtyTree);
        }

        let branch = if create_branch {
            let name = self.next_branch_name();
            self.vcs.checkout_new_branch(&name).await?;
            *created = Some(name.clone());
            name
        } else {
            self.vcs.current_branch().await?
        };

        let mut file = tempfile::Builder::new()
            .prefix("remedy-")
            .suffix(".patch")
            .tempfile()
            .map_err(VcsError::PatchFile)?;
        file.write_all(ensure_trailing_newline(patch).as_bytes())
            .and_then(|_| file.flush())
            .map_err(VcsError::PatchFile)?;

        self.vcs.apply_diff(file.path()).await?;
        self.vcs.stage_all().await?;
        let commit = self.vcs.commit(message, &self.identity).await?;
        tracing::info!(branch = %branch, commit = %commit, "committed patch");
        Ok((branch, commit))
    }

    async fn rollback_locked(&self, branch: &str) -> Result<(), VcsError> {
        self.vcs.reset_hard().await?;
        self.vcs.checkout(&self.trunk).await?;
        if branch != self.trunk && self.vcs.branch_exists(branch).await? {
            self.vcs.delete_branch(branch, true).await?;
        }
        tracing::info!(branch = %branch, trunk = %self.trunk, "rolled back");
        Ok(())
    }

    /// Undo a failed sequence when configured to. Returns whether the
    /// working tree was restored.
    async fn recover(&self, created: Option<&str>, current: &str) -> bool {
        if !self.rollback_on_failure {
            return false;
        }
        let result = match created {
            Some(branch) => self.rollback_locked(branch).await,
            // Committing onto an existing branch: only discard the tree state.
            None => self.vcs.reset_hard().await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(branch = %current, "rollback after failure failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ChangeExecutor for Executor {
    async fn apply_patch(&self, patch: &str, opts: &ApplyOptions) -> ApplyResult {
        let _guard = self.repo.lock().await;
        let mut created = None;

        let outcome = async {
            let (branch, commit) = self
                .branch_and_commit(patch, &opts.message, opts.create_branch, &mut created)
                .await?;
            if opts.auto_merge {
                self.vcs.checkout(&self.trunk).await?;
                self.vcs.merge(&branch).await?;
                tracing::info!(branch = %branch, trunk = %self.trunk, "merged into trunk");
            }
            Ok::<_, VcsError>((branch, commit))
        }
        .await;

        match outcome {
            Ok((branch, commit)) => ApplyResult {
                branch,
                success: true,
                merged: opts.auto_merge,
                commit: Some(commit),
                error: None,
                rolled_back: false,
            },
            Err(e) => {
                let branch = created.clone().unwrap_or_default();
                tracing::warn!(branch = %branch, "apply failed: {}", e);
                let mut result = ApplyResult::failed(branch.clone(), e.to_string());
                if !matches!(e, VcsError::DirtyTree | VcsError::EmptyPatch) {
                    result.rolled_back = self.recover(created.as_deref(), &branch).await;
                }
                result
            }
        }
    }

    async fn create_pull_request(&self, patch: &str, opts: &PrOptions) -> PullRequestResult {
        let _guard = self.repo.lock().await;
        let mut created = None;

        let outcome = async {
            let (branch, commit) = self
                .branch_and_commit(patch, &opts.title, true, &mut created)
                .await?;
            self.vcs.push(&self.remote, &branch).await?;
            tracing::info!(branch = %branch, remote = %self.remote, "pushed review branch");
            self.vcs.checkout(&self.trunk).await?;
            Ok::<_, VcsError>((branch, commit))
        }
        .await;

        match outcome {
            Ok((branch, commit)) => PullRequestResult {
                branch,
                success: true,
                title: opts.title.clone(),
                description: opts.description.clone(),
                commit: Some(commit),
                remote: Some(self.remote.clone()),
                error: None,
                rolled_back: false,
            },
            Err(e) => {
                let branch = created.clone().unwrap_or_default();
                tracing::warn!(branch = %branch, "pull request failed: {}", e);
                let mut result = PullRequestResult::failed(
                    branch.clone(),
                    opts.title.clone(),
                    opts.description.clone(),
                    e.to_string(),
                );
                if created.is_some() {
                    result.rolled_back = self.recover(created.as_deref(), &branch).await;
                }
                result
            }
        }
    }

    async fn rollback(&self, branch: &str) -> Result<(), VcsError> {
        let _guard = self.repo.lock().await;
        self.rollback_locked(branch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{git_available, init_repo_with_file};
    use git2::Repository;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records every primitive call; fails the named operation on demand.
    #[derive(Default)]
    struct MockVcs {
        calls: StdMutex<Vec<String>>,
        dirty: bool,
        fail_on: Option<&'static str>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockVcs {
        fn failing(op: &'static str) -> Self {
            Self {
                fail_on: Some(op),
                ..Default::default()
            }
        }

        fn record(&self, call: String) -> Result<(), VcsError> {
            let op = call.split_whitespace().next().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(op.as_str()) {
                return Err(VcsError::CommandFailed {
                    op,
                    stderr: "simulated failure".into(),
                });
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Vcs for MockVcs {
        async fn is_clean(&self) -> Result<bool, VcsError> {
            Ok(!self.dirty)
        }
        async fn current_branch(&self) -> Result<String, VcsError> {
            Ok("main".into())
        }
        async fn branch_exists(&self, _name: &str) -> Result<bool, VcsError> {
            Ok(true)
        }
        async fn checkout_new_branch(&self, name: &str) -> Result<(), VcsError> {
            self.record(format!("branch {}", name))
        }
        async fn apply_diff(&self, patch_file: &Path) -> Result<(), VcsError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            assert!(patch_file.exists());
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.record("apply".into())
        }
        async fn stage_all(&self) -> Result<(), VcsError> {
            self.record("stage".into())
        }
        async fn commit(&self, message: &str, author: &BotIdentity) -> Result<String, VcsError> {
            self.record(format!("commit {} <{}>", message, author.email))?;
            Ok("abc123".into())
        }
        async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
            self.record(format!("checkout {}", branch))
        }
        async fn merge(&self, branch: &str) -> Result<(), VcsError> {
            self.record(format!("merge {}", branch))
        }
        async fn push(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
            self.record(format!("push {} {}", remote, branch))
        }
        async fn delete_branch(&self, name: &str, force: bool) -> Result<(), VcsError> {
            self.record(format!("delete {} {}", name, force))
        }
        async fn reset_hard(&self) -> Result<(), VcsError> {
            self.record("reset".into())
        }
    }

    fn executor(vcs: Arc<MockVcs>) -> Executor {
        let dir = std::env::temp_dir().join(format!("remedy-mock-{}", uuid::Uuid::new_v4()));
        Executor::new(vcs, RepoHandle::open(dir), &AgentConfig::default())
    }

    fn apply_opts(auto_merge: bool) -> ApplyOptions {
        ApplyOptions {
            create_branch: true,
            auto_merge,
            message: "fix: thing".into(),
        }
    }

    #[tokio::test]
    async fn test_apply_and_merge_sequence() {
        let vcs = Arc::new(MockVcs::default());
        let result = executor(vcs.clone()).apply_patch("diff", &apply_opts(true)).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.merged);
        assert!(result.branch.starts_with("agent/fix-"));
        assert_eq!(result.commit.as_deref(), Some("abc123"));

        let calls = vcs.calls();
        assert_eq!(calls[0], format!("branch {}", result.branch));
        assert_eq!(
            calls[1..].to_vec(),
            vec![
                "apply".to_string(),
                "stage".to_string(),
                "commit fix: thing <remedy-bot@localhost>".to_string(),
                "checkout main".to_string(),
                format!("merge {}", result.branch),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_without_merge_stays_on_branch() {
        let vcs = Arc::new(MockVcs::default());
        let result = executor(vcs.clone()).apply_patch("diff", &apply_opts(false)).await;
        assert!(result.success);
        assert!(!result.merged);
        assert!(!vcs.calls().iter().any(|c| c.starts_with("merge") || c.starts_with("checkout")));
    }

    #[tokio::test]
    async fn test_dirty_tree_refused_without_touching_repo() {
        let vcs = Arc::new(MockVcs {
            dirty: true,
            ..Default::default()
        });
        let result = executor(vcs.clone()).apply_patch("diff", &apply_opts(true)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("uncommitted"));
        assert!(!result.rolled_back);
        assert!(vcs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_patch_refused() {
        let vcs = Arc::new(MockVcs::default());
        let result = executor(vcs.clone()).apply_patch("  \n", &apply_opts(true)).await;
        assert!(!result.success);
        assert!(vcs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_conflict_rolls_back() {
        let vcs = Arc::new(MockVcs::failing("apply"));
        let result = executor(vcs.clone()).apply_patch("diff", &apply_opts(true)).await;

        assert!(!result.success);
        assert!(result.rolled_back);
        assert!(result.error.unwrap().contains("simulated failure"));
        let calls = vcs.calls();
        assert_eq!(
            calls[calls.len() - 3..].to_vec(),
            vec![
                "reset".to_string(),
                "checkout main".to_string(),
                format!("delete {} true", result.branch),
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_disabled_leaves_branch() {
        let vcs = Arc::new(MockVcs::failing("merge"));
        let mut config = AgentConfig::default();
        config.repository.rollback_on_failure = false;
        let dir = tempfile::tempdir().unwrap();
        let exec = Executor::new(vcs.clone(), RepoHandle::open(dir.path()), &config);

        let result = exec.apply_patch("diff", &apply_opts(true)).await;
        assert!(!result.success);
        assert!(!result.rolled_back);
        assert!(!vcs.calls().iter().any(|c| c == "reset"));
    }

    #[tokio::test]
    async fn test_pull_request_pushes_then_returns_to_trunk() {
        let vcs = Arc::new(MockVcs::default());
        let opts = PrOptions {
            title: "fix(test_fail): pager".into(),
            description: "body".into(),
        };
        let result = executor(vcs.clone()).create_pull_request("diff", &opts).await;

        assert!(result.success);
        assert_eq!(result.title, "fix(test_fail): pager");
        assert_eq!(result.remote.as_deref(), Some("origin"));
        let calls = vcs.calls();
        let n = calls.len();
        assert_eq!(calls[n - 2], format!("push origin {}", result.branch));
        assert_eq!(calls[n - 1], "checkout main");
    }

    #[tokio::test]
    async fn test_push_rejection_is_reported() {
        let vcs = Arc::new(MockVcs::failing("push"));
        let opts = PrOptions {
            title: "t".into(),
            description: "d".into(),
        };
        let result = executor(vcs).create_pull_request("diff", &opts).await;
        assert!(!result.success);
        assert!(result.rolled_back);
        assert!(result.error.unwrap().contains("git push failed"));
        assert!(result.branch.starts_with("agent/fix-"));
    }

    #[tokio::test]
    async fn test_branch_names_strictly_increase() {
        let exec = executor(Arc::new(MockVcs::default()));
        let names: Vec<i64> = (0..50)
            .map(|_| {
                exec.next_branch_name()
                    .trim_start_matches("agent/fix-")
                    .parse()
                    .unwrap()
            })
            .collect();
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_concurrent_applies_are_serialized() {
        let vcs = Arc::new(MockVcs::default());
        let exec = Arc::new(executor(vcs.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let exec = exec.clone();
                tokio::spawn(async move { exec.apply_patch("diff", &apply_opts(false)).await })
            })
            .collect();
        let mut branches = Vec::new();
        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.success);
            branches.push(result.branch);
        }

        assert_eq!(vcs.max_in_flight.load(Ordering::SeqCst), 1);
        branches.sort();
        branches.dedup();
        assert_eq!(branches.len(), 4);
    }

    #[test]
    fn test_handles_for_same_path_share_lock() {
        let dir = tempfile::tempdir().unwrap();
        let a = RepoHandle::open(dir.path());
        let b = RepoHandle::open(dir.path());
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
    }

    #[tokio::test]
    async fn test_real_repo_apply_and_rollback() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_file(dir.path(), "calc.txt", "1 + 1 = 3\n");
        let exec = Executor::for_repo(dir.path(), &AgentConfig::default());
        let patch = "--- a/calc.txt\n+++ b/calc.txt\n@@ -1 +1 @@\n-1 + 1 = 3\n+1 + 1 = 2\n";

        let result = exec
            .apply_patch(
                patch,
                &ApplyOptions {
                    create_branch: true,
                    auto_merge: false,
                    message: "fix: arithmetic".into(),
                },
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        let content = std::fs::read_to_string(dir.path().join("calc.txt")).unwrap();
        assert_eq!(content, "1 + 1 = 2\n");

        exec.rollback(&result.branch).await.unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
        assert!(
            repo.find_branch(&result.branch, git2::BranchType::Local)
                .is_err()
        );
        let content = std::fs::read_to_string(dir.path().join("calc.txt")).unwrap();
        assert_eq!(content, "1 + 1 = 3\n");
    }

    #[tokio::test]
    async fn test_real_repo_conflict_leaves_trunk_untouched() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_file(dir.path(), "calc.txt", "unrelated\n");
        let exec = Executor::for_repo(dir.path(), &AgentConfig::default());
        let patch = "--- a/calc.txt\n+++ b/calc.txt\n@@ -1 +1 @@\n-1 + 1 = 3\n+1 + 1 = 2\n";

        let result = exec.apply_patch(patch, &apply_opts(true)).await;
        assert!(!result.success);
        assert!(result.rolled_back);

        let repo = Repository::open(dir.path()).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("calc.txt")).unwrap(),
            "unrelated\n"
        );
        let branches = repo.branches(Some(git2::BranchType::Local)).unwrap().count();
        assert_eq!(branches, 1);
    }
}
