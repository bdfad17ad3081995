//! Tick step 4: consume the orchestrator's inbox.
//!
//! Every message is archived after handling, whether or not handling
//! succeeded, so nothing is ever delivered twice.

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::types::{Agent, AgentStatus, Event, EventKind, Message, MessageKind};
use crate::error::is_not_found;
use crate::project::FOREMAN_INBOX;
use crate::release::release_agent;
use crate::tick::{TickContext, TickEvents};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InboxReport {
    pub handled: usize,
    pub failed: usize,
}

#[instrument(skip_all)]
pub fn process_inbox(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<InboxReport> {
    let mut report = InboxReport::default();
    for message in ctx.project.messages.list_pending(FOREMAN_INBOX)? {
        match dispatch(ctx, events, &message) {
            Ok(()) => report.handled += 1,
            Err(err) => {
                warn!(
                    id = %message.id,
                    kind = message.kind.as_str(),
                    from = %message.from,
                    err = format!("{err:#}"),
                    "message handling failed"
                );
                report.failed += 1;
            }
        }
        if let Err(err) = ctx.project.messages.archive(&message) {
            warn!(id = %message.id, err = format!("{err:#}"), "failed to archive message");
        }
    }
    Ok(report)
}

fn dispatch(ctx: &TickContext<'_>, events: &mut TickEvents, message: &Message) -> Result<()> {
    match message.kind {
        MessageKind::TaskDone => on_task_done(ctx, events, message),
        MessageKind::TaskFailed => on_task_failed(ctx, events, message),
        MessageKind::Help => on_help(ctx, events, message),
        MessageKind::Checkpoint => on_checkpoint(ctx, message),
        MessageKind::UserMessage | MessageKind::MergeResult => {
            info!(
                kind = message.kind.as_str(),
                from = %message.from,
                text = message.payload_str("text").unwrap_or_default(),
                "message received"
            );
            Ok(())
        }
    }
}

fn task_id(message: &Message) -> Result<&str> {
    message
        .task_id
        .as_deref()
        .ok_or_else(|| anyhow!("{} message from {} has no task", message.kind.as_str(), message.from))
}

/// Complete the task, queue its branch for merging and idle the worker.
fn on_task_done(ctx: &TickContext<'_>, events: &mut TickEvents, message: &Message) -> Result<()> {
    let task_id = task_id(message)?;
    let result = message.payload_str("result").map(str::to_string);
    let task = ctx.project.tasks.complete(task_id, result.clone())?;
    let owner = task.assigned_to.clone().unwrap_or_else(|| message.from.clone());
    events.push(
        Event::new(EventKind::TaskDone)
            .task(task_id)
            .agent(&owner)
            .data(json!({ "result": result })),
    );

    let branch = task
        .branch
        .as_deref()
        .ok_or_else(|| anyhow!("completed task {task_id} has no branch to merge"))?;
    set_idle(ctx, &owner)?;
    ctx.project
        .queue
        .enqueue(task_id, branch, &owner)
        .with_context(|| format!("enqueue {task_id} for merge"))?;
    info!(task = task_id, agent = %owner, branch, "task done, queued for merge");
    Ok(())
}

/// Fail the task and idle the worker; its session and worktree are freed,
/// the branch is kept for inspection.
fn on_task_failed(ctx: &TickContext<'_>, events: &mut TickEvents, message: &Message) -> Result<()> {
    let task_id = task_id(message)?;
    let reason = message.payload_str("reason").map(str::to_string);
    let task = ctx.project.tasks.fail(task_id, reason.clone())?;
    let owner = task.assigned_to.unwrap_or_else(|| message.from.clone());
    events.push(
        Event::new(EventKind::TaskFailed)
            .task(task_id)
            .agent(&owner)
            .data(json!({ "reason": reason })),
    );
    if let Some(agent) = set_idle(ctx, &owner)? {
        release_agent(ctx, &agent);
    }
    warn!(task = task_id, agent = %owner, "task failed");
    Ok(())
}

/// Forward to the liaison's inbox unchanged.
fn on_help(ctx: &TickContext<'_>, events: &mut TickEvents, message: &Message) -> Result<()> {
    let liaison = &ctx.config.scheduler.liaison_id;
    ctx.project.messages.send(
        MessageKind::Help,
        &message.from,
        liaison,
        message.task_id.as_deref(),
        message.payload.clone(),
    )?;
    let mut event = Event::new(EventKind::HelpRequested)
        .agent(&message.from)
        .data(message.payload.clone());
    if let Some(task) = &message.task_id {
        event = event.task(task);
    }
    events.push(event);
    info!(from = %message.from, to = %liaison, "help request forwarded");
    Ok(())
}

fn on_checkpoint(ctx: &TickContext<'_>, message: &Message) -> Result<()> {
    let task_id = task_id(message)?;
    let note = message
        .payload_str("note")
        .ok_or_else(|| anyhow!("checkpoint for {task_id} has no note"))?;
    ctx.project.tasks.set_checkpoint(task_id, note)?;
    match ctx.project.agents.heartbeat(&message.from, Some(note)) {
        Ok(_) => {}
        Err(err) if is_not_found(&err) => {
            warn!(agent = %message.from, "checkpoint from unknown agent");
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

/// Idle `agent_id` if it is a known active agent. Unknown senders (e.g. a
/// human driving the CLI) are not an error.
fn set_idle(ctx: &TickContext<'_>, agent_id: &str) -> Result<Option<Agent>> {
    let agent = match ctx.project.agents.get(agent_id) {
        Ok(agent) => agent,
        Err(err) if is_not_found(&err) => return Ok(None),
        Err(err) => return Err(err),
    };
    if agent.status != AgentStatus::Active {
        return Ok(None);
    }
    ctx.project
        .agents
        .set_status(agent_id, AgentStatus::Idle)
        .map(Some)
}
