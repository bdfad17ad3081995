//! One-time startup recovery after an unclean stop.
//!
//! Runs before the first tick: agents that died while nobody was watching
//! are retired, tasks held by missing or dead agents go back to the pool,
//! and partial writes are swept up.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::liveness::{Liveness, classify};
use crate::core::types::{Agent, AgentRole, AgentStatus};
use crate::io::atomic::remove_stale_tmp;
use crate::liveness::{Reclaim, process_alive, reclaim_if_owned, retire_agent};
use crate::release::{delete_branch, remove_worktree};
use crate::tick::{TickContext, TickEvents};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub agents_retired: usize,
    pub tasks_reclaimed: usize,
    pub temp_files_removed: usize,
}

#[instrument(skip_all)]
pub fn reconcile(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let thresholds = ctx.config.thresholds();

    for agent in ctx.project.agents.list()? {
        if !agent.is_active() || agent.role == AgentRole::Liaison {
            continue;
        }
        let alive = process_alive(ctx.runtime, &agent);
        if classify(alive, agent.staleness(ctx.now), &thresholds) != Liveness::Dead {
            continue;
        }
        let reason = if alive { "heartbeat expired while stopped" } else { "process gone at startup" };
        match retire_agent(ctx, events, &agent, reason) {
            Ok(()) => report.agents_retired += 1,
            Err(err) => warn!(agent = %agent.id, err = format!("{err:#}"), "failed to retire agent"),
        }
    }

    // Re-read: retiring above already reclaimed the tasks it could.
    let agents: HashMap<String, Agent> = ctx
        .project
        .agents
        .list()?
        .into_iter()
        .map(|agent| (agent.id.clone(), agent))
        .collect();
    for task in ctx.project.tasks.list()? {
        if !task.status.is_claimed() {
            continue;
        }
        let owner = task.assigned_to.as_deref().and_then(|id| agents.get(id));
        if owner.is_some_and(|agent| agent.status != AgentStatus::Dead) {
            continue;
        }
        let owner_id = task.assigned_to.as_deref().unwrap_or_default();
        match reclaim_if_owned(ctx, events, &task.id, owner_id) {
            Ok(Reclaim::Reclaimed) => report.tasks_reclaimed += 1,
            Ok(Reclaim::Kept | Reclaim::Missing) => continue,
            Err(err) => {
                warn!(task = %task.id, err = format!("{err:#}"), "failed to reclaim orphaned task");
                continue;
            }
        }
        if let Some(worktree) = owner.and_then(|agent| agent.worktree.as_deref()) {
            remove_worktree(ctx, worktree);
        }
        if let Some(branch) = &task.branch {
            delete_branch(ctx, branch);
        }
    }

    let paths = &ctx.project.paths;
    for dir in [&paths.queue_dir, &paths.tasks_dir, &paths.agents_dir] {
        match remove_stale_tmp(dir) {
            Ok(removed) => report.temp_files_removed += removed,
            Err(err) => warn!(dir = %dir.display(), err = format!("{err:#}"), "failed to sweep temp files"),
        }
    }

    info!(
        agents_retired = report.agents_retired,
        tasks_reclaimed = report.tasks_reclaimed,
        temp_files_removed = report.temp_files_removed,
        "startup reconciliation finished"
    );
    Ok(report)
}
