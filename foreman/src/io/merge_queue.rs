//! FIFO merge queue (`.foreman/queue/<entry-id>.json`).
//!
//! Entry ids are sortable, so directory order is arrival order. At most one
//! outstanding entry may exist per task; a second enqueue is refused.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, instrument};

use super::atomic::{remove_stale_tmp, write_json};
use super::ids::sortable_id;
use super::store::list_records;
use crate::core::types::MergeQueueEntry;
use crate::error::{QueueError, StoreError};

#[derive(Debug, Clone)]
pub struct MergeQueue {
    dir: PathBuf,
}

impl MergeQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[instrument(skip_all, fields(task = task_id, branch))]
    pub fn enqueue(&self, task_id: &str, branch: &str, agent_id: &str) -> Result<MergeQueueEntry> {
        if self.list()?.iter().any(|entry| entry.task_id == task_id) {
            return Err(QueueError::DuplicateEntry {
                task_id: task_id.to_string(),
            }
            .into());
        }
        let entry = MergeQueueEntry {
            id: sortable_id(),
            task_id: task_id.to_string(),
            branch: branch.to_string(),
            agent_id: agent_id.to_string(),
            enqueued_at: Utc::now(),
        };
        write_json(&self.path(&entry.id), &entry)?;
        debug!(id = %entry.id, "merge request enqueued");
        Ok(entry)
    }

    /// Pending entries in arrival order.
    pub fn list(&self) -> Result<Vec<MergeQueueEntry>> {
        list_records(&self.dir)
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Consume an entry.
    pub fn remove(&self, entry: &MergeQueueEntry) -> Result<()> {
        let path = self.path(&entry.id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                kind: "queue entry",
                id: entry.id.clone(),
            }
            .into()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }

    /// Drop partial writes left by an interrupted enqueue.
    pub fn remove_stale_tmp(&self) -> Result<usize> {
        remove_stale_tmp(&self.dir)
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}
