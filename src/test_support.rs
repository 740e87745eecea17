//! Helpers shared by unit tests.

use git2::{IndexAddOption, Repository, Signature};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Some tests drive the real `git` binary; they return early without it.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Initialize a repository on branch `main` with one committed file.
pub fn init_repo_with_file(dir: &Path, name: &str, content: &str) -> Repository {
    let repo = Repository::init(dir).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }
    repo.set_head("refs/heads/main").unwrap();
    commit_file(&repo, dir, name, content, "init");
    repo
}

/// Write a file and commit everything in the working tree.
pub fn commit_file(repo: &Repository, dir: &Path, name: &str, content: &str, msg: &str) {
    fs::write(dir.join(name), content).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    match parent {
        Some(parent) => repo
            .commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
            .unwrap(),
        None => repo
            .commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
            .unwrap(),
    };
}
