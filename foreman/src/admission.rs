//! Admission control over persisted state.
//!
//! Every check re-derives occupancy from disk and stops at the first denial,
//! so later (more expensive or irrelevant) reads are skipped.

use anyhow::Result;
use tracing::debug;

use crate::core::admission::{Admission, Limits, check_budget, check_queue, check_workers};
use crate::core::types::{AgentRole, AgentStatus};
use crate::project::Project;

/// Workers currently marked active.
pub fn active_workers(project: &Project) -> Result<usize> {
    Ok(project
        .agents
        .list()?
        .iter()
        .filter(|agent| agent.role == AgentRole::Worker && agent.status == AgentStatus::Active)
        .count())
}

/// May one more worker be spawned? Checked budget, then workers, then queue depth.
pub fn can_spawn_worker(project: &Project, limits: &Limits) -> Result<Admission> {
    if let Some(denial) = check_budget(limits, project.events.total_cost()?) {
        debug!(%denial, "admission denied");
        return Ok(Admission::Denied(denial));
    }
    if let Some(denial) = check_workers(limits, active_workers(project)?) {
        debug!(%denial, "admission denied");
        return Ok(Admission::Denied(denial));
    }
    if let Some(denial) = check_queue(limits, project.queue.depth()?) {
        debug!(%denial, "admission denied");
        return Ok(Admission::Denied(denial));
    }
    Ok(Admission::Allowed)
}
