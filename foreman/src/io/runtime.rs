//! Agent runtime seam: how worker and resolver sessions are started, stopped
//! and checked for liveness.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use super::process::{run_checked, run_with_timeout};
use crate::core::types::AgentRole;

/// Everything needed to start one autonomous agent session.
#[derive(Debug, Clone)]
pub struct ProvisionRequest<'a> {
    pub agent_id: &'a str,
    pub role: AgentRole,
    pub task_id: Option<&'a str>,
    /// Agent environment (its worktree).
    pub workdir: &'a Path,
    /// Rendered instructions the agent reads first.
    pub brief_path: &'a Path,
    pub project_root: &'a Path,
    /// Program and arguments to launch.
    pub command: &'a [String],
}

/// Handles for a started session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub session: String,
    pub pid: Option<u32>,
}

pub trait AgentRuntime {
    fn provision(&self, request: &ProvisionRequest<'_>) -> Result<Provisioned>;
    fn terminate(&self, session: &str) -> Result<()>;
    fn process_alive(&self, pid: u32) -> bool;
    fn session_alive(&self, session: &str) -> bool;
}

/// Runs each agent in a detached tmux session named `foreman-<agent-id>`.
#[derive(Debug, Clone)]
pub struct TmuxRuntime {
    timeout: Duration,
}

impl TmuxRuntime {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn session_name(agent_id: &str) -> String {
        format!("foreman-{agent_id}")
    }

    fn tmux(args: &[&str]) -> Command {
        let mut cmd = Command::new("tmux");
        cmd.args(args);
        cmd
    }

    fn pane_pid(&self, session: &str) -> Result<u32> {
        let raw = run_checked(
            Self::tmux(&["display-message", "-p", "-t", session, "#{pane_pid}"]),
            self.timeout,
            "tmux display-message",
        )?;
        raw.parse()
            .with_context(|| format!("parse pane pid '{raw}' for {session}"))
    }
}

impl AgentRuntime for TmuxRuntime {
    #[instrument(skip_all, fields(agent = request.agent_id, role = %request.role))]
    fn provision(&self, request: &ProvisionRequest<'_>) -> Result<Provisioned> {
        if request.command.is_empty() {
            return Err(anyhow!("empty agent command for {}", request.agent_id));
        }
        let session = Self::session_name(request.agent_id);
        let workdir = path_str(request.workdir)?;
        let env = [
            ("FOREMAN_AGENT_ID", request.agent_id.to_string()),
            ("FOREMAN_ROLE", request.role.as_str().to_string()),
            (
                "FOREMAN_TASK_ID",
                request.task_id.unwrap_or_default().to_string(),
            ),
            ("FOREMAN_BRIEF", path_str(request.brief_path)?.to_string()),
            ("FOREMAN_ROOT", path_str(request.project_root)?.to_string()),
        ];

        let mut cmd = Self::tmux(&["new-session", "-d", "-s", &session, "-c", workdir]);
        for (key, value) in &env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.args(request.command);
        run_checked(cmd, self.timeout, "tmux new-session")?;

        let pid = match self.pane_pid(&session) {
            Ok(pid) => pid,
            Err(err) => {
                if let Err(kill_err) = self.terminate(&session) {
                    warn!(err = format!("{kill_err:#}"), "failed to clean up session");
                }
                return Err(err);
            }
        };
        info!(session = %session, pid, "agent session started");
        Ok(Provisioned {
            session,
            pid: Some(pid),
        })
    }

    #[instrument(skip_all, fields(session))]
    fn terminate(&self, session: &str) -> Result<()> {
        if !self.session_alive(session) {
            debug!("session already gone");
            return Ok(());
        }
        run_checked(
            Self::tmux(&["kill-session", "-t", session]),
            self.timeout,
            "tmux kill-session",
        )?;
        Ok(())
    }

    fn process_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }

    fn session_alive(&self, session: &str) -> bool {
        run_with_timeout(Self::tmux(&["has-session", "-t", session]), self.timeout)
            .map(|out| out.success())
            .unwrap_or(false)
    }
}

/// Signal-0 check: the pid exists (even if owned by someone else).
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("non-UTF-8 path {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!pid_alive(pid));
    }

    #[test]
    fn out_of_range_pid_is_not_alive() {
        assert!(!pid_alive(0));
        assert!(!pid_alive(u32::MAX));
    }

    #[test]
    fn session_names_are_namespaced() {
        assert_eq!(TmuxRuntime::session_name("worker-3"), "foreman-worker-3");
    }
}
