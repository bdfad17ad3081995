//! Per-tick context and the event buffer threaded through every step.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::core::types::Event;
use crate::io::config::ForemanConfig;
use crate::io::event_log::EventLog;
use crate::io::runtime::AgentRuntime;
use crate::io::vcs::VersionControl;
use crate::project::Project;
use crate::shutdown::ShutdownFlag;

/// Everything a tick step reads. Built fresh for every tick so config
/// changes take effect without a restart.
pub struct TickContext<'a> {
    pub project: &'a Project,
    pub config: &'a ForemanConfig,
    pub runtime: &'a dyn AgentRuntime,
    pub vcs: &'a dyn VersionControl,
    pub shutdown: &'a ShutdownFlag,
    pub now: DateTime<Utc>,
}

/// Events produced during one tick, appended to the log in one batch at the end.
#[derive(Debug, Default)]
pub struct TickEvents {
    events: Vec<Event>,
}

impl TickEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append everything buffered and clear the buffer. Returns how many were written.
    pub fn flush(&mut self, log: &EventLog) -> Result<usize> {
        log.append_all(&self.events)?;
        let written = self.events.len();
        self.events.clear();
        Ok(written)
    }
}
