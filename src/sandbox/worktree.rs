use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

/// A detached `git worktree` of a base ref with a candidate patch applied.
///
/// Tests run here so a plan can be validated without touching the shared
/// working tree. Call [`ScratchWorktree::remove`] when done; the temp
/// directory is deleted on drop either way.
pub struct ScratchWorktree {
    repo: PathBuf,
    tree: PathBuf,
    scratch: TempDir,
}

impl ScratchWorktree {
    /// Check out `base` (normally the trunk branch) into a scratch directory.
    pub async fn create(repo: &Path, base: &str, patch: &str) -> Result<Self> {
        let scratch = tempfile::tempdir().context("Failed to create sandbox directory")?;
        let tree = scratch.path().join("tree");

        // Drop registrations left behind by runs that never reached remove().
        if let Err(e) = git(repo, &["worktree", "prune"]).await {
            tracing::warn!("failed to prune stale worktrees: {:#}", e);
        }
        git(repo, &["worktree", "add", "--detach", path_arg(&tree)?, base])
            .await
            .context("Failed to create sandbox worktree")?;

        let worktree = Self {
            repo: repo.to_path_buf(),
            tree,
            scratch,
        };

        if !patch.trim().is_empty() {
            let patch_file = worktree.scratch.path().join("plan.patch");
            tokio::fs::write(&patch_file, ensure_trailing_newline(patch))
                .await
                .context("Failed to write sandbox patch")?;
            let applied = git(&worktree.tree, &["apply", path_arg(&patch_file)?]).await;
            if let Err(e) = applied {
                worktree.remove().await;
                return Err(e.context("Patch does not apply in sandbox"));
            }
        }

        Ok(worktree)
    }

    pub fn path(&self) -> &Path {
        &self.tree
    }

    /// Unregister the worktree from the parent repository.
    pub async fn remove(self) {
        let tree = self.tree.to_string_lossy().into_owned();
        if let Err(e) = git(&self.repo, &["worktree", "remove", "--force", &tree]).await {
            tracing::warn!(worktree = %tree, "failed to remove sandbox worktree: {:#}", e);
        }
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("Non UTF-8 path: {}", path.display()))
}

pub(crate) fn ensure_trailing_newline(patch: &str) -> String {
    if patch.ends_with('\n') {
        patch.to_string()
    } else {
        format!("{}\n", patch)
    }
}

async fn git(dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))?;

    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
