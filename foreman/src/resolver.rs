//! Resolver lifecycle: spawn on a merge conflict, poll for resolution
//! (tick step 6), hand the resolved branch back to the merge queue.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::conflict::{ConflictContext, has_conflict_markers};
use crate::core::types::{Agent, AgentRole, Event, EventKind};
use crate::error::QueueError;
use crate::io::artifacts::{Artifacts, ResolverBrief, read_conflict, remove_conflict, write_conflict};
use crate::io::runtime::ProvisionRequest;
use crate::io::vcs::{MergeOutcome, VersionControl};
use crate::release::{delete_branch, release_agent, remove_worktree};
use crate::tick::{TickContext, TickEvents};

/// Start a resolver on a fresh branch from the conflict's base with the
/// conflicting merge replayed, so the markers are present in its worktree.
///
/// Nothing is left behind on failure: branch, worktree, conflict file and
/// brief are removed before the error is returned.
#[instrument(skip_all, fields(task = %conflict.task_id))]
pub fn spawn_resolver(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    conflict: &ConflictContext,
) -> Result<Agent> {
    let project = ctx.project;
    let agent_id = project.agents.next_id(AgentRole::Resolver)?;
    let branch = ctx.config.branch_for(&format!("resolve/{agent_id}"));
    let workdir = project.paths.worktree(&agent_id);

    ctx.vcs
        .create_branch(&branch, &conflict.base_branch)
        .with_context(|| format!("create resolver branch {branch}"))?;

    let rollback = |session: Option<&str>| {
        if let Some(session) = session
            && let Err(err) = ctx.runtime.terminate(session)
        {
            warn!(session, err = format!("{err:#}"), "failed to terminate session");
        }
        remove_worktree(ctx, &workdir);
        delete_branch(ctx, &branch);
        if let Err(err) = remove_conflict(&project.paths, &agent_id) {
            warn!(err = format!("{err:#}"), "failed to remove conflict file");
        }
        if let Ok(artifacts) = Artifacts::new(&project.paths)
            && let Err(err) = artifacts.remove_brief(&agent_id)
        {
            warn!(err = format!("{err:#}"), "failed to remove brief");
        }
    };

    let provisioned = (|| {
        ctx.vcs
            .create_worktree(&workdir, &branch)
            .with_context(|| format!("create worktree for {agent_id}"))?;
        match ctx.vcs.merge(&workdir, &conflict.source_branch)? {
            MergeOutcome::Conflict { .. } => {}
            MergeOutcome::Clean => bail!(
                "replaying {} onto {} merged cleanly, nothing to resolve",
                conflict.source_branch,
                conflict.base_branch
            ),
        }
        let conflict_path = write_conflict(&project.paths, &agent_id, conflict)?;
        let brief_path = Artifacts::new(&project.paths)?.write_resolver_brief(&ResolverBrief {
            agent_id: &agent_id,
            ctx: conflict,
            branch: &branch,
            workdir: &workdir,
            conflict_path: &conflict_path,
        })?;
        ctx.runtime.provision(&ProvisionRequest {
            agent_id: &agent_id,
            role: AgentRole::Resolver,
            task_id: Some(&conflict.task_id),
            workdir: &workdir,
            brief_path: &brief_path,
            project_root: &project.paths.root,
            command: &ctx.config.agent.resolver_command,
        })
    })();
    let provisioned = match provisioned {
        Ok(provisioned) => provisioned,
        Err(err) => {
            rollback(None);
            return Err(err.context(format!("spawn resolver {agent_id}")));
        }
    };

    let mut agent = Agent::new(&agent_id, AgentRole::Resolver, ctx.now);
    agent.task_id = Some(conflict.task_id.clone());
    agent.branch = Some(branch.clone());
    agent.worktree = Some(workdir.clone());
    agent.session = Some(provisioned.session.clone());
    agent.pid = provisioned.pid;
    if let Err(err) = project.agents.save(&agent) {
        rollback(Some(&provisioned.session));
        return Err(err.context(format!("record resolver {agent_id}")));
    }

    events.push(
        Event::new(EventKind::ResolverSpawned)
            .agent(&agent_id)
            .task(&conflict.task_id)
            .data(json!({
                "branch": branch,
                "source_branch": conflict.source_branch,
                "files": conflict.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            })),
    );
    events.push(
        Event::new(EventKind::AgentSpawned)
            .agent(&agent_id)
            .task(&conflict.task_id)
            .data(json!({ "role": AgentRole::Resolver, "session": agent.session })),
    );
    info!(agent = %agent_id, branch = %branch, "resolver spawned");
    Ok(agent)
}

/// Resolved once no originally conflicting file still carries markers and
/// the checkout has nothing uncommitted (which also means the merge was
/// concluded).
pub fn detect_resolution(vcs: &dyn VersionControl, dir: &Path, conflict: &ConflictContext) -> Result<bool> {
    for file in &conflict.files {
        let path = dir.join(&file.path);
        // A file resolved by deletion has no markers.
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        if has_conflict_markers(&String::from_utf8_lossy(&bytes)) {
            return Ok(false);
        }
    }
    vcs.is_clean(dir)
}

/// Check every active resolver and hand back those that are done.
/// Returns the number handed back this tick.
#[instrument(skip_all)]
pub fn poll_resolvers(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<usize> {
    let mut resolved = 0;
    for agent in ctx.project.agents.list()? {
        if agent.role != AgentRole::Resolver || !agent.is_active() {
            continue;
        }
        let Some(worktree) = agent.worktree.as_deref() else {
            warn!(agent = %agent.id, "resolver has no worktree");
            continue;
        };
        let outcome = read_conflict(&ctx.project.paths, &agent.id).and_then(|conflict| {
            if detect_resolution(ctx.vcs, worktree, &conflict)? {
                hand_back(ctx, events, &agent, &conflict).map(|()| true)
            } else {
                Ok(false)
            }
        });
        match outcome {
            Ok(true) => resolved += 1,
            Ok(false) => {}
            Err(err) => warn!(agent = %agent.id, err = format!("{err:#}"), "resolver poll failed"),
        }
    }
    Ok(resolved)
}

/// Move the resolution onto the task's source branch, re-queue the task and
/// retire the resolver.
fn hand_back(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    agent: &Agent,
    conflict: &ConflictContext,
) -> Result<()> {
    let branch = agent
        .branch
        .as_deref()
        .with_context(|| format!("resolver {} has no branch", agent.id))?;
    ctx.vcs
        .move_branch(&conflict.source_branch, branch)
        .with_context(|| format!("move {} to {branch}", conflict.source_branch))?;

    match ctx
        .project
        .queue
        .enqueue(&conflict.task_id, &conflict.source_branch, &conflict.owner_agent)
    {
        Ok(_) => {}
        Err(err) if matches!(err.downcast_ref::<QueueError>(), Some(QueueError::DuplicateEntry { .. })) => {
            warn!(task = %conflict.task_id, "task already queued, not re-queuing");
        }
        Err(err) => return Err(err),
    }

    release_agent(ctx, agent);
    delete_branch(ctx, branch);
    if let Err(err) = remove_conflict(&ctx.project.paths, &agent.id) {
        warn!(agent = %agent.id, err = format!("{err:#}"), "failed to remove conflict file");
    }
    ctx.project.agents.mark_dead(&agent.id)?;

    events.push(
        Event::new(EventKind::AgentDied)
            .agent(&agent.id)
            .task(&conflict.task_id)
            .data(json!({ "reason": "resolved" })),
    );
    events.push(
        Event::new(EventKind::ResolverResolved)
            .agent(&agent.id)
            .task(&conflict.task_id)
            .data(json!({ "source_branch": conflict.source_branch })),
    );
    info!(agent = %agent.id, task = %conflict.task_id, "conflict resolved, task re-queued");
    Ok(())
}
