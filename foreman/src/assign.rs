//! Tick step 3: hand ready tasks to freshly provisioned workers.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::admission::can_spawn_worker;
use crate::core::admission::{Admission, Denial};
use crate::core::readiness::{assignment_order, find_ready};
use crate::core::types::{Agent, AgentRole, Event, EventKind, Task};
use crate::io::artifacts::{Artifacts, WorkerBrief};
use crate::io::runtime::ProvisionRequest;
use crate::release::{delete_branch, remove_worktree};
use crate::tick::{TickContext, TickEvents};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AssignReport {
    pub assigned: Vec<String>,
    pub skipped: usize,
    /// Set when admission stopped the pass early.
    pub denial: Option<Denial>,
}

/// Walk ready tasks (priority first, then creation order) and spawn one
/// worker per task until admission control says no.
#[instrument(skip_all)]
pub fn assign_ready(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<AssignReport> {
    let tasks = ctx.project.tasks.list()?;
    let limits = ctx.config.limits();
    let mut report = AssignReport::default();

    for task in assignment_order(find_ready(&tasks)) {
        if let Admission::Denied(denial) = can_spawn_worker(ctx.project, &limits)? {
            // The reason is global, so no later task could pass either.
            info!(%denial, "assignment paused");
            report.denial = Some(denial);
            break;
        }
        match spawn_worker(ctx, task) {
            Ok(agent) => {
                let branch = agent.branch.clone().unwrap_or_default();
                events.push(
                    Event::new(EventKind::TaskAssigned)
                        .task(&task.id)
                        .agent(&agent.id)
                        .data(json!({ "branch": branch })),
                );
                events.push(
                    Event::new(EventKind::AgentSpawned)
                        .agent(&agent.id)
                        .task(&task.id)
                        .data(json!({ "role": agent.role, "session": agent.session })),
                );
                info!(task = %task.id, agent = %agent.id, branch = %branch, "task assigned");
                report.assigned.push(task.id.clone());
            }
            Err(err) => {
                warn!(task = %task.id, err = format!("{err:#}"), "failed to provision worker");
                report.skipped += 1;
            }
        }
    }
    Ok(report)
}

/// Create branch + worktree, render the brief and start a session for `task`.
///
/// The agent record and task assignment are only persisted once the session
/// is up; every earlier failure undoes what was created.
#[instrument(skip_all, fields(task = %task.id))]
pub fn spawn_worker(ctx: &TickContext<'_>, task: &Task) -> Result<Agent> {
    let project = ctx.project;
    let trunk = &ctx.config.scheduler.trunk_branch;
    let agent_id = project.agents.next_id(AgentRole::Worker)?;
    let branch = ctx.config.branch_for(&task.id);
    let workdir = project.paths.worktree(&agent_id);

    let created_branch = if ctx.vcs.branch_exists(&branch)? {
        false
    } else {
        ctx.vcs
            .create_branch(&branch, trunk)
            .with_context(|| format!("create branch {branch}"))?;
        true
    };
    let rollback = |session: Option<&str>| {
        if let Some(session) = session
            && let Err(err) = ctx.runtime.terminate(session)
        {
            warn!(session, err = format!("{err:#}"), "failed to terminate session");
        }
        remove_worktree(ctx, &workdir);
        if created_branch {
            delete_branch(ctx, &branch);
        }
        if let Ok(artifacts) = Artifacts::new(&project.paths)
            && let Err(err) = artifacts.remove_brief(&agent_id)
        {
            warn!(err = format!("{err:#}"), "failed to remove brief");
        }
    };

    if let Err(err) = ctx.vcs.create_worktree(&workdir, &branch) {
        rollback(None);
        return Err(err.context(format!("create worktree for {agent_id}")));
    }

    let provisioned = (|| {
        let brief_path = Artifacts::new(&project.paths)?.write_worker_brief(&WorkerBrief {
            agent_id: &agent_id,
            task,
            branch: &branch,
            workdir: &workdir,
            trunk,
            liaison: &ctx.config.scheduler.liaison_id,
            warn_after_secs: ctx.config.liveness.warn_after_secs,
            dead_after_secs: ctx.config.liveness.dead_after_secs,
        })?;
        ctx.runtime.provision(&ProvisionRequest {
            agent_id: &agent_id,
            role: AgentRole::Worker,
            task_id: Some(&task.id),
            workdir: &workdir,
            brief_path: &brief_path,
            project_root: &project.paths.root,
            command: &ctx.config.agent.worker_command,
        })
    })();
    let provisioned = match provisioned {
        Ok(provisioned) => provisioned,
        Err(err) => {
            rollback(None);
            return Err(err.context(format!("provision {agent_id}")));
        }
    };

    let mut agent = Agent::new(&agent_id, AgentRole::Worker, ctx.now);
    agent.task_id = Some(task.id.clone());
    agent.branch = Some(branch.clone());
    agent.worktree = Some(workdir.clone());
    agent.session = Some(provisioned.session.clone());
    agent.pid = provisioned.pid;

    let persisted = project
        .agents
        .save(&agent)
        .and_then(|()| project.tasks.assign(&task.id, &agent_id, &branch));
    if let Err(err) = persisted {
        rollback(Some(&provisioned.session));
        if let Err(mark_err) = project.agents.mark_dead(&agent_id) {
            warn!(err = format!("{mark_err:#}"), "failed to mark orphaned agent dead");
        }
        return Err(err.context(format!("record assignment of {} to {agent_id}", task.id)));
    }
    Ok(agent)
}
