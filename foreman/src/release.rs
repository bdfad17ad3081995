//! Best-effort teardown of agent resources.
//!
//! Failures are logged and swallowed: a half-released agent is retried on
//! the next tick or by startup reconciliation, never allowed to abort a tick.

use std::path::Path;

use tracing::{debug, warn};

use crate::core::types::Agent;
use crate::io::artifacts::Artifacts;
use crate::tick::TickContext;

/// Stop the agent's session and remove its worktree, brief and nudge.
pub(crate) fn release_agent(ctx: &TickContext<'_>, agent: &Agent) {
    if let Some(session) = &agent.session
        && let Err(err) = ctx.runtime.terminate(session)
    {
        warn!(agent = %agent.id, session, err = format!("{err:#}"), "failed to terminate session");
    }
    if let Some(worktree) = &agent.worktree {
        remove_worktree(ctx, worktree);
    }
    match Artifacts::new(&ctx.project.paths) {
        Ok(artifacts) => {
            if let Err(err) = artifacts
                .remove_brief(&agent.id)
                .and_then(|()| artifacts.remove_nudge(&agent.id))
            {
                warn!(agent = %agent.id, err = format!("{err:#}"), "failed to remove agent files");
            }
        }
        Err(err) => warn!(err = format!("{err:#}"), "failed to load templates"),
    }
    debug!(agent = %agent.id, "agent resources released");
}

pub(crate) fn remove_worktree(ctx: &TickContext<'_>, worktree: &Path) {
    if !worktree.exists() {
        return;
    }
    if let Err(err) = ctx.vcs.delete_worktree(worktree) {
        warn!(path = %worktree.display(), err = format!("{err:#}"), "failed to remove worktree");
    }
}

pub(crate) fn delete_branch(ctx: &TickContext<'_>, branch: &str) {
    match ctx.vcs.branch_exists(branch) {
        Ok(false) => {}
        Ok(true) => {
            if let Err(err) = ctx.vcs.delete_branch(branch) {
                warn!(branch, err = format!("{err:#}"), "failed to delete branch");
            }
        }
        Err(err) => warn!(branch, err = format!("{err:#}"), "failed to look up branch"),
    }
}
