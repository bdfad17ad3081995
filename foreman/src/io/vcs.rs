//! Version-control seam used by the merge pipeline and worker provisioning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::git::Git;
pub use super::git::MergeOutcome;

/// Operations the orchestrator needs from version control.
///
/// Branch operations act on the project repository; `dir`-taking operations
/// act on a specific checkout (the project root or an agent worktree).
pub trait VersionControl {
    fn branch_exists(&self, branch: &str) -> Result<bool>;
    fn create_branch(&self, branch: &str, base: &str) -> Result<()>;
    fn delete_branch(&self, branch: &str) -> Result<()>;
    fn create_worktree(&self, path: &Path, branch: &str) -> Result<()>;
    fn delete_worktree(&self, path: &Path) -> Result<()>;
    fn current_branch(&self, dir: &Path) -> Result<String>;
    fn merge(&self, dir: &Path, branch: &str) -> Result<MergeOutcome>;
    fn abort_merge(&self, dir: &Path) -> Result<()>;
    /// No uncommitted changes and no merge in progress.
    fn is_clean(&self, dir: &Path) -> Result<bool>;
    fn last_commit_time(&self, dir: &Path) -> Result<Option<DateTime<Utc>>>;
    /// Move `target` to the commit `source` points at.
    fn move_branch(&self, target: &str, source: &str) -> Result<()>;
}

/// [`VersionControl`] over the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitVcs {
    repo: Git,
    timeout: Duration,
}

impl GitVcs {
    /// `timeout` bounds every git command, normally `command_timeout()`.
    pub fn new(repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo: Git::new(repo_root, timeout),
            timeout,
        }
    }

    fn checkout(&self, dir: &Path) -> Git {
        Git::new(dir, self.timeout)
    }
}

impl VersionControl for GitVcs {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.repo.branch_exists(branch)
    }

    fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        self.repo.create_branch(branch, base)
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.repo.delete_branch(branch)
    }

    fn create_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        self.repo.add_worktree(path, branch)
    }

    fn delete_worktree(&self, path: &Path) -> Result<()> {
        self.repo.remove_worktree(path)
    }

    fn current_branch(&self, dir: &Path) -> Result<String> {
        self.checkout(dir).current_branch()
    }

    fn merge(&self, dir: &Path, branch: &str) -> Result<MergeOutcome> {
        self.checkout(dir).merge_no_ff(branch)
    }

    fn abort_merge(&self, dir: &Path) -> Result<()> {
        self.checkout(dir).abort_merge()
    }

    fn is_clean(&self, dir: &Path) -> Result<bool> {
        let git = self.checkout(dir);
        Ok(git.status_porcelain()?.is_empty() && !git.merge_in_progress()?)
    }

    fn last_commit_time(&self, dir: &Path) -> Result<Option<DateTime<Utc>>> {
        self.checkout(dir).last_commit_time()
    }

    fn move_branch(&self, target: &str, source: &str) -> Result<()> {
        self.repo.update_branch(target, source)
    }
}
