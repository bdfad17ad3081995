//! Orchestrator configuration stored at `.foreman/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use crate::core::admission::Limits;
use crate::core::liveness::Thresholds;

/// Orchestrator configuration (TOML).
///
/// Edited by humans and reloaded at the start of every tick, so limits can
/// change without a restart. Missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForemanConfig {
    pub limits: LimitsConfig,
    pub liveness: LivenessConfig,
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Total cost (sum of event `cost` payloads) after which no worker spawns.
    pub budget_ceiling: f64,
    pub max_workers: usize,
    pub max_queue_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            budget_ceiling: 50.0,
            max_workers: 4,
            max_queue_depth: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LivenessConfig {
    pub warn_after_secs: u64,
    pub critical_after_secs: u64,
    pub dead_after_secs: u64,
    /// Commit inactivity after which the liaison is asked to look at a worker.
    pub stall_after_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            warn_after_secs: 5 * 60,
            critical_after_secs: 8 * 60,
            dead_after_secs: 10 * 60,
            stall_after_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// Branch every task is merged into.
    pub trunk_branch: String,
    /// Prefix for task and resolver branches.
    pub branch_prefix: String,
    /// Inbox that receives help requests and escalations.
    pub liaison_id: String,
    /// Upper bound for any single git or tmux command.
    pub command_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            trunk_branch: "main".to_string(),
            branch_prefix: "foreman/".to_string(),
            liaison_id: "liaison".to_string(),
            command_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command launched inside a worker session (e.g. `["claude"]`).
    pub worker_command: Vec<String>,
    pub resolver_command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            worker_command: vec!["claude".to_string()],
            resolver_command: vec!["claude".to_string()],
        }
    }
}

impl ForemanConfig {
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if !limits.budget_ceiling.is_finite() || limits.budget_ceiling < 0.0 {
            return Err(anyhow!("limits.budget_ceiling must be a finite number >= 0"));
        }
        if limits.max_workers == 0 {
            return Err(anyhow!("limits.max_workers must be >= 1"));
        }
        if limits.max_queue_depth == 0 {
            return Err(anyhow!("limits.max_queue_depth must be >= 1"));
        }

        let liveness = &self.liveness;
        if !(liveness.warn_after_secs < liveness.critical_after_secs
            && liveness.critical_after_secs < liveness.dead_after_secs)
        {
            return Err(anyhow!(
                "liveness thresholds must satisfy warn_after_secs < critical_after_secs < dead_after_secs"
            ));
        }
        if liveness.stall_after_secs == 0 {
            return Err(anyhow!("liveness.stall_after_secs must be > 0"));
        }

        let scheduler = &self.scheduler;
        if scheduler.tick_interval_secs == 0 {
            return Err(anyhow!("scheduler.tick_interval_secs must be > 0"));
        }
        if scheduler.command_timeout_secs == 0 {
            return Err(anyhow!("scheduler.command_timeout_secs must be > 0"));
        }
        if scheduler.trunk_branch.trim().is_empty() {
            return Err(anyhow!("scheduler.trunk_branch must not be empty"));
        }
        if scheduler.liaison_id.trim().is_empty() {
            return Err(anyhow!("scheduler.liaison_id must not be empty"));
        }

        for (name, command) in [
            ("agent.worker_command", &self.agent.worker_command),
            ("agent.resolver_command", &self.agent.resolver_command),
        ] {
            if command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            budget_ceiling: self.limits.budget_ceiling,
            max_workers: self.limits.max_workers,
            max_queue_depth: self.limits.max_queue_depth,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            warn: Duration::from_secs(self.liveness.warn_after_secs),
            critical: Duration::from_secs(self.liveness.critical_after_secs),
            dead: Duration::from_secs(self.liveness.dead_after_secs),
        }
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.liveness.stall_after_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.command_timeout_secs)
    }

    /// Branch name for a task or resolver id.
    pub fn branch_for(&self, name: &str) -> String {
        format!("{}{name}", self.scheduler.branch_prefix)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForemanConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForemanConfig> {
    if !path.exists() {
        return Ok(ForemanConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForemanConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForemanConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ForemanConfig::default());
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = ForemanConfig::default();
        cfg.limits.budget_ceiling = 5.0;
        cfg.scheduler.trunk_branch = "trunk".into();
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[limits]\nmax_workers = 2\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.limits.max_workers, 2);
        assert_eq!(cfg.limits.max_queue_depth, 10);
        assert_eq!(cfg.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn rejects_misordered_thresholds() {
        let mut cfg = ForemanConfig::default();
        cfg.liveness.critical_after_secs = cfg.liveness.dead_after_secs;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_caps_and_negative_budget() {
        let mut cfg = ForemanConfig::default();
        cfg.limits.max_workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ForemanConfig::default();
        cfg.limits.max_queue_depth = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ForemanConfig::default();
        cfg.limits.budget_ceiling = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_agent_command() {
        let mut cfg = ForemanConfig::default();
        cfg.agent.resolver_command = Vec::new();
        assert!(cfg.validate().is_err());
    }
}
