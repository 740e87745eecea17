use crate::config::BotIdentity;
use crate::errors::VcsError;
use async_trait::async_trait;
use git2::{Repository, StatusOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Version-control primitives the executor is built from.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn is_clean(&self) -> Result<bool, VcsError>;
    async fn current_branch(&self) -> Result<String, VcsError>;
    async fn branch_exists(&self, name: &str) -> Result<bool, VcsError>;
    async fn checkout_new_branch(&self, name: &str) -> Result<(), VcsError>;
    /// Apply a diff to the working tree and the index.
    async fn apply_diff(&self, patch_file: &Path) -> Result<(), VcsError>;
    /// Stage changes to tracked files. Untracked files (agent state, build
    /// output) never enter a bot commit.
    async fn stage_all(&self) -> Result<(), VcsError>;
    /// Returns the new commit sha.
    async fn commit(&self, message: &str, author: &BotIdentity) -> Result<String, VcsError>;
    async fn checkout(&self, branch: &str) -> Result<(), VcsError>;
    async fn merge(&self, branch: &str) -> Result<(), VcsError>;
    async fn push(&self, remote: &str, branch: &str) -> Result<(), VcsError>;
    async fn delete_branch(&self, name: &str, force: bool) -> Result<(), VcsError>;
    /// Discard uncommitted changes and any in-progress merge.
    async fn reset_hard(&self) -> Result<(), VcsError>;
}

/// `Vcs` over a local checkout: reads through libgit2, mutations through the
/// `git` binary so hooks, attributes and credentials behave as for a user.
pub struct GitCli {
    repo_path: PathBuf,
}

impl GitCli {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn open(&self) -> Result<Repository, VcsError> {
        Ok(Repository::open(&self.repo_path)?)
    }

    async fn git(&self, op: &str, args: &[&str]) -> Result<String, VcsError> {
        self.git_with_env(op, args, &[]).await
    }

    async fn git_with_env(
        &self,
        op: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<String, VcsError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }

        tracing::debug!(op, args = ?args, "git");
        let output = cmd.output().await.map_err(|source| VcsError::Spawn {
            op: op.to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Err(VcsError::CommandFailed {
                op: op.to_string(),
                stderr: if stderr.is_empty() { stdout } else { stderr },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn is_clean(&self) -> Result<bool, VcsError> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }

    async fn current_branch(&self) -> Result<String, VcsError> {
        let repo = self.open()?;
        let head = repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, VcsError> {
        let repo = self.open()?;
        Ok(repo.find_branch(name, git2::BranchType::Local).is_ok())
    }

    async fn checkout_new_branch(&self, name: &str) -> Result<(), VcsError> {
        self.git("checkout", &["checkout", "-b", name]).await.map(|_| ())
    }

    async fn apply_diff(&self, patch_file: &Path) -> Result<(), VcsError> {
        let path = patch_file.to_string_lossy();
        self.git("apply", &["apply", "--index", "--whitespace=nowarn", &path])
            .await
            .map(|_| ())
    }

    async fn stage_all(&self) -> Result<(), VcsError> {
        self.git("add", &["add", "--update"]).await.map(|_| ())
    }

    async fn commit(&self, message: &str, author: &BotIdentity) -> Result<String, VcsError> {
        let env = [
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
        ];
        self.git_with_env("commit", &["commit", "--no-verify", "-m", message], &env)
            .await?;
        self.git("rev-parse", &["rev-parse", "HEAD"]).await
    }

    async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        self.git("checkout", &["checkout", branch]).await.map(|_| ())
    }

    async fn merge(&self, branch: &str) -> Result<(), VcsError> {
        self.git("merge", &["merge", "--no-edit", branch])
            .await
            .map(|_| ())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), VcsError> {
        self.git("push", &["push", "-u", remote, branch])
            .await
            .map(|_| ())
    }

    async fn delete_branch(&self, name: &str, force: bool) -> Result<(), VcsError> {
        let flag = if force { "-D" } else { "-d" };
        self.git("branch", &["branch", flag, name]).await.map(|_| ())
    }

    async fn reset_hard(&self) -> Result<(), VcsError> {
        // Fails harmlessly when no merge is in progress.
        let _ = self.git("merge", &["merge", "--abort"]).await;
        self.git("reset", &["reset", "--hard", "HEAD"]).await.map(|_| ())
    }
}
