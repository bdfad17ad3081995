//! Canonical `.foreman/` layout and project scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::atomic::write_atomic;
use super::config::{ForemanConfig, write_config};

/// All canonical paths within `.foreman/` for a project root.
#[derive(Debug, Clone)]
pub struct ForemanPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub events_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub messages_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub queue_dir: PathBuf,
    pub conflicts_dir: PathBuf,
    pub briefs_dir: PathBuf,
    pub nudges_dir: PathBuf,
    pub worktrees_dir: PathBuf,
}

impl ForemanPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".foreman");
        Self {
            root: root.clone(),
            gitignore_path: state_dir.join(".gitignore"),
            config_path: state_dir.join("config.toml"),
            lock_path: state_dir.join("daemon.lock"),
            events_path: state_dir.join("events.jsonl"),
            tasks_dir: state_dir.join("tasks"),
            agents_dir: state_dir.join("agents"),
            messages_dir: state_dir.join("messages"),
            archive_dir: state_dir.join("archive"),
            queue_dir: state_dir.join("queue"),
            conflicts_dir: state_dir.join("conflicts"),
            briefs_dir: state_dir.join("briefs"),
            nudges_dir: state_dir.join("nudges"),
            worktrees_dir: state_dir.join("worktrees"),
            state_dir,
        }
    }

    /// Walk up from `start` to the nearest directory holding `.foreman/`.
    pub fn discover(start: &Path) -> Result<Self> {
        for dir in start.ancestors() {
            if dir.join(".foreman").is_dir() {
                return Ok(Self::new(dir));
            }
        }
        Err(anyhow!(
            "no .foreman directory found from {} (run `foreman init`)",
            start.display()
        ))
    }

    pub fn is_initialized(&self) -> bool {
        self.state_dir.is_dir()
    }

    pub fn worktree(&self, agent_id: &str) -> PathBuf {
        self.worktrees_dir.join(agent_id)
    }

    pub fn brief(&self, agent_id: &str) -> PathBuf {
        self.briefs_dir.join(format!("{agent_id}.md"))
    }

    pub fn nudge(&self, agent_id: &str) -> PathBuf {
        self.nudges_dir.join(format!("{agent_id}.md"))
    }

    pub fn conflict(&self, resolver_id: &str) -> PathBuf {
        self.conflicts_dir.join(format!("{resolver_id}.json"))
    }

    fn record_dirs(&self) -> [&Path; 9] {
        [
            &self.tasks_dir,
            &self.agents_dir,
            &self.messages_dir,
            &self.archive_dir,
            &self.queue_dir,
            &self.conflicts_dir,
            &self.briefs_dir,
            &self.nudges_dir,
            &self.worktrees_dir,
        ]
    }
}

/// Options for [`init_project`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Rewrite `config.toml` and `.gitignore` even if `.foreman/` exists.
    /// Records are never touched.
    pub force: bool,
}

/// Create `.foreman/` scaffolding in `root`.
///
/// Fails if `.foreman/` already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ForemanPaths> {
    let paths = ForemanPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!("foreman init: .foreman exists but is not a directory"));
    }
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "foreman init: .foreman already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.state_dir)?;
    for dir in paths.record_dirs() {
        create_dir(dir)?;
    }
    write_atomic(&paths.gitignore_path, STATE_GITIGNORE.as_bytes())?;
    write_config(&paths.config_path, &ForemanConfig::default())?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const STATE_GITIGNORE: &str = "*\n";
