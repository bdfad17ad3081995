//! Tick step 5: drain the merge queue into the trunk, one entry at a time.

use std::fs;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use crate::core::conflict::{
    ConflictContext, ConflictFile, ConflictTask, has_conflict_markers, parse_conflict_regions,
};
use crate::core::types::{AgentRole, AgentStatus, Event, EventKind, MergeQueueEntry, MessageKind};
use crate::io::vcs::MergeOutcome;
use crate::project::FOREMAN_INBOX;
use crate::release::release_agent;
use crate::resolver::spawn_resolver;
use crate::tick::{TickContext, TickEvents};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Entries left queued because shutdown was requested mid-drain.
    pub deferred: usize,
}

/// Merge pending entries in arrival order. Stops early (leaving the rest
/// queued) on a shutdown request or when the trunk cannot be restored.
#[instrument(skip_all)]
pub fn drain_merge_queue(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let entries = ctx.project.queue.list()?;
    if entries.is_empty() {
        return Ok(report);
    }

    let root = &ctx.project.paths.root;
    let trunk = &ctx.config.scheduler.trunk_branch;
    let current = ctx.vcs.current_branch(root)?;
    if &current != trunk {
        warn!(current = %current, trunk = %trunk, "project checkout is not on the trunk, skipping merges");
        return Ok(report);
    }
    if !ctx.vcs.is_clean(root)? {
        warn!("project checkout has uncommitted changes, skipping merges");
        return Ok(report);
    }

    for (idx, entry) in entries.iter().enumerate() {
        if ctx.shutdown.is_requested() {
            report.deferred = entries.len() - idx;
            info!(deferred = report.deferred, "shutdown requested, leaving entries queued");
            break;
        }
        events.push(entry_event(EventKind::MergeStarted, entry).data(json!({ "branch": entry.branch })));

        match ctx.vcs.merge(root, &entry.branch) {
            Ok(MergeOutcome::Clean) => {
                on_clean(ctx, events, entry)?;
                report.merged += 1;
            }
            Ok(MergeOutcome::Conflict { files }) => {
                // Markers only exist until the abort, so capture them first.
                let conflict_files = read_conflicts(ctx, &files);
                if let Err(err) = ctx.vcs.abort_merge(root) {
                    error!(task = %entry.task_id, err = format!("{err:#}"), "failed to abort conflicting merge");
                    return Err(err.context("trunk left mid-merge"));
                }
                on_conflict(ctx, events, entry, conflict_files)?;
                report.conflicts += 1;
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(task = %entry.task_id, branch = %entry.branch, err = %reason, "merge failed");
                events.push(entry_event(EventKind::MergeFailed, entry).data(json!({ "error": reason })));
                ctx.project.queue.remove(entry)?;
                notify_owner(ctx, entry, json!({ "status": "failed", "error": reason }));
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

fn on_clean(ctx: &TickContext<'_>, events: &mut TickEvents, entry: &MergeQueueEntry) -> Result<()> {
    events.push(entry_event(EventKind::MergeSucceeded, entry).data(json!({ "branch": entry.branch })));
    ctx.project.queue.remove(entry)?;
    info!(task = %entry.task_id, branch = %entry.branch, "merged into trunk");
    notify_owner(ctx, entry, json!({ "status": "merged" }));

    // The owner's job is over once its branch lands.
    match ctx.project.agents.get(&entry.agent_id) {
        Ok(agent) if agent.role == AgentRole::Worker && agent.status == AgentStatus::Idle => {
            release_agent(ctx, &agent);
            ctx.project.agents.mark_dead(&agent.id)?;
            events.push(
                Event::new(EventKind::AgentDied)
                    .agent(&agent.id)
                    .task(&entry.task_id)
                    .data(json!({ "reason": "merged" })),
            );
        }
        Ok(_) => {}
        Err(err) => warn!(agent = %entry.agent_id, err = format!("{err:#}"), "merge owner not found"),
    }
    Ok(())
}

fn on_conflict(
    ctx: &TickContext<'_>,
    events: &mut TickEvents,
    entry: &MergeQueueEntry,
    files: Vec<ConflictFile>,
) -> Result<()> {
    let paths: Vec<&str> = files.iter().map(|file| file.path.as_str()).collect();
    events.push(entry_event(EventKind::MergeConflict, entry).data(json!({
        "branch": entry.branch,
        "files": paths,
    })));
    ctx.project.queue.remove(entry)?;
    warn!(task = %entry.task_id, files = ?paths, "merge conflict");

    let task = ctx.project.tasks.get(&entry.task_id);
    let conflict = ConflictContext {
        task_id: entry.task_id.clone(),
        base_branch: ctx.config.scheduler.trunk_branch.clone(),
        source_branch: entry.branch.clone(),
        owner_agent: entry.agent_id.clone(),
        task: match task {
            Ok(task) => ConflictTask {
                title: task.title,
                description: task.description,
                tags: task.tags,
                result: task.result,
            },
            Err(err) => {
                warn!(task = %entry.task_id, err = format!("{err:#}"), "conflicting task record unreadable");
                ConflictTask {
                    title: entry.task_id.clone(),
                    description: String::new(),
                    tags: Vec::new(),
                    result: None,
                }
            }
        },
        files,
    };

    if let Err(err) = spawn_resolver(ctx, events, &conflict) {
        let reason = format!("{err:#}");
        warn!(task = %entry.task_id, err = %reason, "resolver dispatch failed, notifying owner");
        notify_owner(
            ctx,
            entry,
            json!({
                "status": "conflict",
                "error": reason,
                "files": conflict.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            }),
        );
    }
    Ok(())
}

/// Parse conflict regions from the working copy while the merge is still open.
fn read_conflicts(ctx: &TickContext<'_>, files: &[String]) -> Vec<ConflictFile> {
    files
        .iter()
        .map(|path| {
            let regions = match fs::read(ctx.project.paths.root.join(path)) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    if has_conflict_markers(&text) {
                        parse_conflict_regions(&text)
                    } else {
                        Vec::new()
                    }
                }
                // Deleted on one side.
                Err(_) => Vec::new(),
            };
            ConflictFile {
                path: path.clone(),
                regions,
            }
        })
        .collect()
}

fn notify_owner(ctx: &TickContext<'_>, entry: &MergeQueueEntry, payload: Value) {
    let sent = ctx.project.messages.send(
        MessageKind::MergeResult,
        FOREMAN_INBOX,
        &entry.agent_id,
        Some(&entry.task_id),
        payload,
    );
    if let Err(err) = sent {
        warn!(agent = %entry.agent_id, err = format!("{err:#}"), "failed to notify merge owner");
    }
}

fn entry_event(kind: EventKind, entry: &MergeQueueEntry) -> Event {
    Event::new(kind).task(&entry.task_id).agent(&entry.agent_id)
}
