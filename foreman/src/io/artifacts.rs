//! Files the orchestrator leaves for agents: briefs, nudges and persisted
//! conflict contexts.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use super::atomic::{read_json, write_atomic, write_json};
use super::paths::ForemanPaths;
use crate::core::conflict::ConflictContext;
use crate::core::types::{Agent, Task};

const WORKER_TEMPLATE: &str = include_str!("templates/worker.md");
const RESOLVER_TEMPLATE: &str = include_str!("templates/resolver.md");
const NUDGE_TEMPLATE: &str = include_str!("templates/nudge.md");

/// Inputs for a worker brief.
#[derive(Debug, Clone)]
pub struct WorkerBrief<'a> {
    pub agent_id: &'a str,
    pub task: &'a Task,
    pub branch: &'a str,
    pub workdir: &'a Path,
    pub trunk: &'a str,
    pub liaison: &'a str,
    pub warn_after_secs: u64,
    pub dead_after_secs: u64,
}

/// Inputs for a resolver brief.
#[derive(Debug, Clone)]
pub struct ResolverBrief<'a> {
    pub agent_id: &'a str,
    pub ctx: &'a ConflictContext,
    pub branch: &'a str,
    pub workdir: &'a Path,
    pub conflict_path: &'a Path,
}

/// Template engine wrapper around minijinja.
pub struct Artifacts<'p> {
    paths: &'p ForemanPaths,
    env: Environment<'static>,
}

impl<'p> Artifacts<'p> {
    pub fn new(paths: &'p ForemanPaths) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("worker", WORKER_TEMPLATE)
            .context("load worker template")?;
        env.add_template("resolver", RESOLVER_TEMPLATE)
            .context("load resolver template")?;
        env.add_template("nudge", NUDGE_TEMPLATE)
            .context("load nudge template")?;
        Ok(Self { paths, env })
    }

    /// Render and write `.foreman/briefs/<agent>.md`.
    pub fn write_worker_brief(&self, brief: &WorkerBrief<'_>) -> Result<PathBuf> {
        let rendered = self.env.get_template("worker")?.render(context! {
            agent_id => brief.agent_id,
            task => brief.task,
            branch => brief.branch,
            workdir => brief.workdir.display().to_string(),
            trunk => brief.trunk,
            liaison => brief.liaison,
            warn_after_secs => brief.warn_after_secs,
            dead_after_secs => brief.dead_after_secs,
        })?;
        self.write_brief(brief.agent_id, &rendered)
    }

    pub fn write_resolver_brief(&self, brief: &ResolverBrief<'_>) -> Result<PathBuf> {
        let rendered = self.env.get_template("resolver")?.render(context! {
            agent_id => brief.agent_id,
            ctx => brief.ctx,
            branch => brief.branch,
            workdir => brief.workdir.display().to_string(),
            conflict_path => brief.conflict_path.display().to_string(),
        })?;
        self.write_brief(brief.agent_id, &rendered)
    }

    /// Leave a warning-level nudge where the agent will notice it.
    pub fn write_nudge(&self, agent: &Agent, stale_secs: u64, remaining_secs: u64) -> Result<PathBuf> {
        let rendered = self.env.get_template("nudge")?.render(context! {
            agent_id => &agent.id,
            task_id => agent.task_id.as_deref(),
            stale_secs => stale_secs,
            remaining_secs => remaining_secs,
        })?;
        let path = self.paths.nudge(&agent.id);
        write_atomic(&path, rendered.as_bytes())?;
        debug!(agent = %agent.id, path = %path.display(), "nudge written");
        Ok(path)
    }

    pub fn remove_nudge(&self, agent_id: &str) -> Result<()> {
        remove_if_exists(&self.paths.nudge(agent_id))
    }

    pub fn remove_brief(&self, agent_id: &str) -> Result<()> {
        remove_if_exists(&self.paths.brief(agent_id))
    }

    fn write_brief(&self, agent_id: &str, rendered: &str) -> Result<PathBuf> {
        let path = self.paths.brief(agent_id);
        write_atomic(&path, rendered.as_bytes())?;
        debug!(agent = agent_id, path = %path.display(), "brief written");
        Ok(path)
    }
}

/// Persist the conflict a resolver is working on.
pub fn write_conflict(paths: &ForemanPaths, resolver_id: &str, ctx: &ConflictContext) -> Result<PathBuf> {
    let path = paths.conflict(resolver_id);
    write_json(&path, ctx)?;
    Ok(path)
}

pub fn read_conflict(paths: &ForemanPaths, resolver_id: &str) -> Result<ConflictContext> {
    read_json(&paths.conflict(resolver_id))
}

pub fn remove_conflict(paths: &ForemanPaths, resolver_id: &str) -> Result<()> {
    remove_if_exists(&paths.conflict(resolver_id))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
