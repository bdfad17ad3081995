//! Git adapter.
//!
//! Branches, worktrees and merges all go through a small, explicit wrapper
//! around `git` subprocess calls, each bounded by a timeout.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use super::process::{CommandOutput, run_with_timeout};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of `git merge` that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean,
    /// Content conflict; the working tree is left mid-merge.
    Conflict { files: Vec<String> },
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    /// Commands that outlive `timeout` are killed and reported as errors.
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True while a merge is in progress (`MERGE_HEAD` exists).
    pub fn merge_in_progress(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "-q", "--verify", "MERGE_HEAD"])?;
        Ok(out.status.success())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create `branch` pointing at `base` without checking it out.
    #[instrument(skip_all, fields(branch, base))]
    pub fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        debug!(branch, base, "creating branch");
        self.run_checked(&["branch", branch, base])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Check out an existing `branch` into a new worktree at `path`.
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    pub fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path_arg(path)?;
        debug!("adding worktree");
        self.run_checked(&["worktree", "add", path_str, branch])?;
        Ok(())
    }

    /// Remove a worktree (discarding local changes) and prune stale metadata.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_str = path_arg(path)?;
        debug!("removing worktree");
        let removed = self.run_checked(&["worktree", "remove", "--force", path_str]);
        self.run_checked(&["worktree", "prune"])?;
        removed.map(|_| ())
    }

    /// Point `refs/heads/<target>` at whatever `source` resolves to.
    #[instrument(skip_all, fields(target, source))]
    pub fn update_branch(&self, target: &str, source: &str) -> Result<()> {
        let sha = self.run_capture(&["rev-parse", "--verify", source])?;
        let sha = sha.trim();
        debug!(sha, "moving branch");
        self.run_checked(&["update-ref", &format!("refs/heads/{target}"), sha])?;
        Ok(())
    }

    /// `git merge --no-ff --no-edit <branch>`.
    ///
    /// Content conflicts come back as [`MergeOutcome::Conflict`] with the tree
    /// left mid-merge; any other failure is an error.
    #[instrument(skip_all, fields(branch))]
    pub fn merge_no_ff(&self, branch: &str) -> Result<MergeOutcome> {
        let out = self.run(&["merge", "--no-ff", "--no-edit", branch])?;
        if out.status.success() {
            debug!("merge clean");
            return Ok(MergeOutcome::Clean);
        }
        let files = self.conflicted_files()?;
        if !files.is_empty() {
            debug!(files = files.len(), "merge conflict");
            return Ok(MergeOutcome::Conflict { files });
        }
        if self.merge_in_progress()? {
            self.abort_merge()?;
        }
        Err(anyhow!("git merge {branch} failed: {}", out.stderr.trim()))
    }

    /// Paths with unresolved conflicts in the index.
    pub fn conflicted_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    #[instrument(skip_all)]
    pub fn abort_merge(&self) -> Result<()> {
        debug!("aborting merge");
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    /// Committer time of HEAD, or `None` on an unborn branch.
    pub fn last_commit_time(&self) -> Result<Option<DateTime<Utc>>> {
        let out = self.run(&["log", "-1", "--format=%cI"])?;
        if !out.status.success() {
            return Ok(None);
        }
        let raw = out.stdout.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let parsed = DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("parse commit time '{raw}'"))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(anyhow!("git {} failed: {}", args.join(" "), output.stderr.trim()));
        }
        Ok(output)
    }

    /// A timeout is an error; a non-zero exit is left to the caller.
    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_with_timeout(cmd, self.timeout)
            .with_context(|| format!("run git {}", args.join(" ")))?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            ));
        }
        Ok(output)
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("non-UTF-8 path {}", path.display()))
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_unmerged_line() {
        let e = parse_status_line("UU src/lib.rs").expect("parse");
        assert_eq!(e.code, "UU");
        assert_eq!(e.path, "src/lib.rs");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }
}
