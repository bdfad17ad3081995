//! Tick steps 1 and 2: heartbeat escalation and commit-stall detection.

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::liveness::{LivenessAction, classify, next_action, stall_due};
use crate::core::types::{
    Agent, AgentRole, EscalationLevel, Event, EventKind, MessageKind, elapsed,
};
use crate::error::is_not_found;
use crate::io::artifacts::{Artifacts, remove_conflict};
use crate::io::runtime::AgentRuntime;
use crate::project::FOREMAN_INBOX;
use crate::release::{delete_branch, release_agent};
use crate::tick::{TickContext, TickEvents};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LivenessReport {
    pub recovered: usize,
    pub warned: usize,
    pub critical: usize,
    pub retired: usize,
}

/// Process liveness by pid, else by session, else assumed alive.
pub fn process_alive(runtime: &dyn AgentRuntime, agent: &Agent) -> bool {
    match (agent.pid, agent.session.as_deref()) {
        (Some(pid), _) => runtime.process_alive(pid),
        (None, Some(session)) => runtime.session_alive(session),
        (None, None) => true,
    }
}

/// Classify every active autonomous agent and apply the resulting action.
#[instrument(skip_all)]
pub fn check_liveness(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<LivenessReport> {
    let thresholds = ctx.config.thresholds();
    let mut report = LivenessReport::default();

    for mut agent in ctx.project.agents.list()? {
        if !agent.is_active() || agent.role == AgentRole::Liaison {
            continue;
        }
        let alive = process_alive(ctx.runtime, &agent);
        let staleness = agent.staleness(ctx.now);
        let action = next_action(agent.escalation, classify(alive, staleness, &thresholds));

        let applied = match action {
            LivenessAction::Nothing => continue,
            LivenessAction::ClearEscalation => clear(ctx, &mut agent).map(|()| &mut report.recovered),
            LivenessAction::RaiseWarning => {
                warn_agent(ctx, events, &mut agent, staleness.as_secs()).map(|()| &mut report.warned)
            }
            LivenessAction::RaiseCritical => {
                escalate_critical(ctx, events, &mut agent, staleness.as_secs())
                    .map(|()| &mut report.critical)
            }
            LivenessAction::Retire => {
                let reason = if alive {
                    format!("no heartbeat for {}s", staleness.as_secs())
                } else {
                    "process exited".to_string()
                };
                retire_agent(ctx, events, &agent, &reason).map(|()| &mut report.retired)
            }
        };
        match applied {
            Ok(counter) => *counter += 1,
            Err(err) => warn!(agent = %agent.id, ?action, err = format!("{err:#}"), "liveness action failed"),
        }
    }
    Ok(report)
}

fn clear(ctx: &TickContext<'_>, agent: &mut Agent) -> Result<()> {
    agent.escalation = EscalationLevel::None;
    agent.escalated_at = None;
    ctx.project.agents.save(agent)?;
    Artifacts::new(&ctx.project.paths)?.remove_nudge(&agent.id)?;
    info!(agent = %agent.id, "agent recovered");
    Ok(())
}

fn warn_agent(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    agent: &mut Agent,
    stale_secs: u64,
) -> Result<()> {
    agent.escalation = EscalationLevel::Warning;
    agent.escalated_at = Some(ctx.now);
    ctx.project.agents.save(agent)?;

    let remaining = ctx.config.liveness.dead_after_secs.saturating_sub(stale_secs);
    Artifacts::new(&ctx.project.paths)?.write_nudge(agent, stale_secs, remaining)?;
    events.push(agent_event(EventKind::AgentWarning, agent).data(json!({ "staleness_secs": stale_secs })));
    info!(agent = %agent.id, stale_secs, "agent escalated to warning");
    Ok(())
}

fn escalate_critical(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    agent: &mut Agent,
    stale_secs: u64,
) -> Result<()> {
    agent.escalation = EscalationLevel::Critical;
    agent.escalated_at = Some(ctx.now);
    ctx.project.agents.save(agent)?;

    ctx.project.messages.send(
        MessageKind::Help,
        FOREMAN_INBOX,
        &ctx.config.scheduler.liaison_id,
        agent.task_id.as_deref(),
        json!({
            "agent": agent.id,
            "reason": format!("{} has not sent a heartbeat for {stale_secs}s", agent.id),
        }),
    )?;
    events.push(agent_event(EventKind::AgentCritical, agent).data(json!({ "staleness_secs": stale_secs })));
    warn!(agent = %agent.id, stale_secs, "agent escalated to critical");
    Ok(())
}

/// Mark `agent` dead, hand its task back to the pool and free its resources.
///
/// Only marking the agent dead can fail this; everything after it is
/// best effort, since a dead agent is never revisited.
#[instrument(skip_all, fields(agent = %agent.id))]
pub(crate) fn retire_agent(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    agent: &Agent,
    reason: &str,
) -> Result<()> {
    let agent = ctx.project.agents.mark_dead(&agent.id)?;
    events.push(agent_event(EventKind::AgentDied, &agent).data(json!({ "reason": reason })));
    warn!(role = %agent.role, reason, "agent retired");

    let reclaim = match agent.task_id.as_deref() {
        Some(task_id) => reclaim_if_owned(ctx, events, task_id, &agent.id).unwrap_or_else(|err| {
            warn!(task = task_id, err = format!("{err:#}"), "failed to reclaim task");
            Reclaim::Kept
        }),
        None => Reclaim::Kept,
    };
    release_agent(ctx, &agent);

    match agent.role {
        AgentRole::Worker => {
            // Finished tasks keep their branch.
            if reclaim != Reclaim::Kept && let Some(branch) = &agent.branch {
                delete_branch(ctx, branch);
            }
        }
        AgentRole::Resolver => {
            if let Err(err) = remove_conflict(&ctx.project.paths, &agent.id) {
                warn!(err = format!("{err:#}"), "failed to remove conflict context");
            }
            if let Some(branch) = &agent.branch {
                delete_branch(ctx, branch);
            }
            let notified = ctx.project.messages.send(
                MessageKind::Help,
                FOREMAN_INBOX,
                &ctx.config.scheduler.liaison_id,
                agent.task_id.as_deref(),
                json!({
                    "agent": agent.id,
                    "reason": format!("resolver {} died ({reason}); the merge conflict is unresolved", agent.id),
                }),
            );
            if let Err(err) = notified {
                warn!(err = format!("{err:#}"), "failed to tell the liaison about a dead resolver");
            }
        }
        AgentRole::Liaison => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reclaim {
    /// Forced back to open.
    Reclaimed,
    /// Finished, or held by someone else.
    Kept,
    /// The task record no longer exists.
    Missing,
}

/// Force `task_id` back to open if `agent_id` still holds it.
pub(crate) fn reclaim_if_owned(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    task_id: &str,
    agent_id: &str,
) -> Result<Reclaim> {
    let task = match ctx.project.tasks.get(task_id) {
        Ok(task) => task,
        Err(err) if is_not_found(&err) => {
            debug!(task = task_id, agent = agent_id, "task gone, nothing to reclaim");
            return Ok(Reclaim::Missing);
        }
        Err(err) => return Err(err),
    };
    if !task.status.is_claimed() || task.assigned_to.as_deref() != Some(agent_id) {
        return Ok(Reclaim::Kept);
    }
    ctx.project.tasks.reclaim(task_id)?;
    events.push(
        Event::new(EventKind::TaskReclaimed)
            .task(task_id)
            .agent(agent_id)
            .data(json!({ "from": task.status })),
    );
    info!(task = task_id, agent = agent_id, "task reclaimed");
    Ok(Reclaim::Reclaimed)
}

/// Ask the liaison about workers whose branch has seen no commit for too long.
#[instrument(skip_all)]
pub fn check_stalls(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<usize> {
    let threshold = ctx.config.stall_after();
    let mut stalled = 0;

    for mut agent in ctx.project.agents.list()? {
        if !agent.is_active() || agent.role != AgentRole::Worker {
            continue;
        }
        let Some(worktree) = agent.worktree.clone() else {
            continue;
        };
        let last_commit = match ctx.vcs.last_commit_time(&worktree) {
            Ok(time) => time,
            Err(err) => {
                warn!(agent = %agent.id, err = format!("{err:#}"), "failed to read last commit time");
                continue;
            }
        };
        let active_since = last_commit.map_or(agent.started_at, |at| at.max(agent.started_at));
        let idle = elapsed(active_since, ctx.now);
        let since_notice = agent.stall_notice_at.map(|at| elapsed(at, ctx.now));
        if !stall_due(idle, since_notice, threshold) {
            continue;
        }

        agent.stall_notice_at = Some(ctx.now);
        let notified = ctx.project.agents.save(&agent).and_then(|()| {
            ctx.project.messages.send(
                MessageKind::Help,
                FOREMAN_INBOX,
                &ctx.config.scheduler.liaison_id,
                agent.task_id.as_deref(),
                json!({
                    "agent": agent.id,
                    "reason": format!("{} has not committed for {}s", agent.id, idle.as_secs()),
                }),
            )
        });
        match notified {
            Ok(_) => {
                events.push(agent_event(EventKind::AgentStalled, &agent).data(json!({ "idle_secs": idle.as_secs() })));
                info!(agent = %agent.id, idle_secs = idle.as_secs(), "worker stalled");
                stalled += 1;
            }
            Err(err) => warn!(agent = %agent.id, err = format!("{err:#}"), "failed to report stall"),
        }
    }
    Ok(stalled)
}

fn agent_event(kind: EventKind, agent: &Agent) -> Event {
    let event = Event::new(kind).agent(&agent.id);
    match &agent.task_id {
        Some(task) => event.task(task),
        None => event,
    }
}
