//! File-backed agent records (`.foreman/agents/<agent-id>.json`).

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use super::atomic::write_json;
use super::ids::{sequence_number, validate_name};
use super::store::{list_records, load_record};
use crate::core::types::{Agent, AgentRole, AgentStatus, EscalationLevel};

const KIND: &str = "agent";

#[derive(Debug, Clone)]
pub struct AgentStore {
    dir: PathBuf,
}

impl AgentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, agent: &Agent) -> Result<()> {
        validate_name(KIND, &agent.id)?;
        write_json(&self.path(&agent.id), agent)
    }

    pub fn get(&self, id: &str) -> Result<Agent> {
        validate_name(KIND, id)?;
        load_record(&self.dir, KIND, id)
    }

    pub fn list(&self) -> Result<Vec<Agent>> {
        list_records(&self.dir)
    }

    /// Next sequential id for `role`: `<role>-N` with N one past the highest seen.
    pub fn next_id(&self, role: AgentRole) -> Result<String> {
        let prefix = role.as_str();
        let max = self
            .list()?
            .iter()
            .filter_map(|agent| sequence_number(&agent.id, prefix))
            .max()
            .unwrap_or(0);
        Ok(format!("{prefix}-{}", max + 1))
    }

    /// Stamp a fresh heartbeat. Any escalation is cleared on the spot.
    pub fn heartbeat(&self, id: &str, progress: Option<&str>) -> Result<Agent> {
        let mut agent = self.get(id)?;
        agent.heartbeat_at = Some(Utc::now());
        if let Some(progress) = progress {
            agent.last_progress = Some(progress.to_string());
        }
        agent.escalation = EscalationLevel::None;
        agent.escalated_at = None;
        self.save(&agent)?;
        debug!(agent = id, "heartbeat recorded");
        Ok(agent)
    }

    pub fn set_status(&self, id: &str, status: AgentStatus) -> Result<Agent> {
        let mut agent = self.get(id)?;
        agent.status = status;
        if status != AgentStatus::Active {
            agent.escalation = EscalationLevel::None;
            agent.escalated_at = None;
        }
        self.save(&agent)?;
        Ok(agent)
    }

    pub fn mark_dead(&self, id: &str) -> Result<Agent> {
        self.set_status(id, AgentStatus::Dead)
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}
