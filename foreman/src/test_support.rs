//! Test-only helpers: a throwaway git project and a scripted agent runtime.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;

use crate::core::types::{Agent, AgentRole};
use crate::io::config::{ForemanConfig, write_config};
use crate::io::paths::{InitOptions, init_project};
use crate::io::runtime::{AgentRuntime, ProvisionRequest, Provisioned};
use crate::io::vcs::GitVcs;
use crate::project::Project;
use crate::shutdown::ShutdownFlag;
use crate::tick::TickContext;

/// Temp git repository on `main` with one commit and `.foreman/` initialized.
pub struct TestProject {
    // Removed on drop.
    temp: tempfile::TempDir,
    root: PathBuf,
    project: Project,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        // Scratch worktrees live next to the repo, not inside it.
        let root = temp.path().join("repo");
        fs::create_dir(&root).context("create repo dir")?;
        git(&root, &["init", "-q", "-b", "main"])?;
        git(&root, &["config", "user.email", "foreman@example.com"])?;
        git(&root, &["config", "user.name", "foreman"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "seed\n").context("write seed")?;
        git(&root, &["add", "-A"])?;
        git(&root, &["commit", "-q", "-m", "seed"])?;

        let paths = init_project(&root, &InitOptions::default())?;
        Ok(Self {
            temp,
            root,
            project: Project::open(paths),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn vcs(&self) -> GitVcs {
        GitVcs::new(&self.root, ForemanConfig::default().command_timeout())
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(&self.root, args)
    }

    pub fn config(&self) -> Result<ForemanConfig> {
        self.project.load_config()
    }

    pub fn write_config(&self, config: &ForemanConfig) -> Result<()> {
        write_config(&self.project.paths.config_path, config)
    }

    /// Commit `contents` to `file` on `branch` (created from `main` if
    /// missing) without disturbing the checkout.
    pub fn commit_on_branch(&self, branch: &str, file: &str, contents: &str) -> Result<()> {
        let exists = git(&self.root, &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")]).is_ok();
        if !exists {
            git(&self.root, &["branch", branch, "main"])?;
        }
        let scratch = self.temp.path().join(format!(".scratch-{}", branch.replace('/', "-")));
        git(&self.root, &["worktree", "add", "-q", path_str(&scratch)?, branch])?;
        let result = (|| {
            write_file(&scratch, file, contents)?;
            git(&scratch, &["add", "-A"])?;
            git(&scratch, &["commit", "-q", "-m", &format!("edit {file} on {branch}")])
        })();
        git(&self.root, &["worktree", "remove", "--force", path_str(&scratch)?])?;
        result.map(|_| ())
    }

    /// Commit `contents` to `file` directly on the checked-out trunk.
    pub fn commit_on_trunk(&self, file: &str, contents: &str) -> Result<()> {
        commit_in(&self.root, file, contents)
    }

    pub fn read_trunk_file(&self, file: &str) -> Result<String> {
        git(&self.root, &["show", &format!("main:{file}")])
    }

    /// Save an active agent record with the given role.
    pub fn add_agent(&self, id: &str, role: AgentRole) -> Result<Agent> {
        let agent = Agent::new(id, role, Utc::now());
        self.project.agents.save(&agent)?;
        Ok(agent)
    }

    /// Tick context over this project with the current config.
    pub fn context<'a>(
        &'a self,
        config: &'a ForemanConfig,
        runtime: &'a dyn AgentRuntime,
        vcs: &'a GitVcs,
        shutdown: &'a ShutdownFlag,
    ) -> TickContext<'a> {
        TickContext {
            project: &self.project,
            config,
            runtime,
            vcs,
            shutdown,
            now: Utc::now(),
        }
    }
}

/// Write and commit `file` in an existing checkout (e.g. an agent worktree).
pub fn commit_in(dir: &Path, file: &str, contents: &str) -> Result<()> {
    write_file(dir, file, contents)?;
    git(dir, &["add", "-A"])?;
    git(dir, &["commit", "-q", "-m", &format!("edit {file}")])?;
    Ok(())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("non-utf8 path {}", path.display()))
}

fn write_file(dir: &Path, file: &str, contents: &str) -> Result<()> {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}

/// Run git in `dir`, returning trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// One recorded `provision` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionCall {
    pub agent_id: String,
    pub role: AgentRole,
    pub task_id: Option<String>,
    pub workdir: PathBuf,
    pub brief_path: PathBuf,
}

#[derive(Debug, Default)]
struct FakeState {
    provisioned: Vec<ProvisionCall>,
    terminated: Vec<String>,
    dead_pids: HashSet<u32>,
    fail_provision: bool,
    next_pid: u32,
    pids: HashMap<String, u32>,
}

/// Scripted [`AgentRuntime`]: records calls, never starts a process.
///
/// Every provisioned agent gets a fake pid that stays alive until
/// [`FakeRuntime::kill`] or `terminate` is called.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `provision` call fail.
    pub fn fail_provisioning(&self, fail: bool) {
        self.lock().fail_provision = fail;
    }

    pub fn kill(&self, pid: u32) {
        self.lock().dead_pids.insert(pid);
    }

    pub fn provisioned(&self) -> Vec<ProvisionCall> {
        self.lock().provisioned.clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.lock().terminated.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        // A panicking test thread poisons the lock; the state is still usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl AgentRuntime for FakeRuntime {
    fn provision(&self, request: &ProvisionRequest<'_>) -> Result<Provisioned> {
        let mut state = self.lock();
        if state.fail_provision {
            bail!("provisioning disabled for {}", request.agent_id);
        }
        state.next_pid += 1;
        let pid = 10_000 + state.next_pid;
        let session = format!("fake-{}", request.agent_id);
        state.pids.insert(session.clone(), pid);
        state.provisioned.push(ProvisionCall {
            agent_id: request.agent_id.to_string(),
            role: request.role,
            task_id: request.task_id.map(str::to_string),
            workdir: request.workdir.to_path_buf(),
            brief_path: request.brief_path.to_path_buf(),
        });
        Ok(Provisioned {
            session,
            pid: Some(pid),
        })
    }

    fn terminate(&self, session: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(pid) = state.pids.get(session).copied() {
            state.dead_pids.insert(pid);
        }
        state.terminated.push(session.to_string());
        Ok(())
    }

    fn process_alive(&self, pid: u32) -> bool {
        !self.lock().dead_pids.contains(&pid)
    }

    fn session_alive(&self, session: &str) -> bool {
        let state = self.lock();
        state
            .pids
            .get(session)
            .is_some_and(|pid| !state.dead_pids.contains(pid))
    }
}
