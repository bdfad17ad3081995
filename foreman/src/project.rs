//! One initialized project: its paths and every durable store under `.foreman/`.

use anyhow::Result;

use crate::io::agent_store::AgentStore;
use crate::io::config::{ForemanConfig, load_config};
use crate::io::event_log::EventLog;
use crate::io::merge_queue::MergeQueue;
use crate::io::message_store::MessageStore;
use crate::io::paths::ForemanPaths;
use crate::io::task_store::TaskStore;

/// Recipient id of the orchestrator's own inbox.
pub const FOREMAN_INBOX: &str = "foreman";

#[derive(Debug, Clone)]
pub struct Project {
    pub paths: ForemanPaths,
    pub tasks: TaskStore,
    pub agents: AgentStore,
    pub messages: MessageStore,
    pub events: EventLog,
    pub queue: MergeQueue,
}

impl Project {
    pub fn open(paths: ForemanPaths) -> Self {
        Self {
            tasks: TaskStore::new(&paths.tasks_dir),
            agents: AgentStore::new(&paths.agents_dir),
            messages: MessageStore::new(&paths.messages_dir, &paths.archive_dir),
            events: EventLog::new(&paths.events_path),
            queue: MergeQueue::new(&paths.queue_dir),
            paths,
        }
    }

    pub fn load_config(&self) -> Result<ForemanConfig> {
        load_config(&self.paths.config_path)
    }
}
