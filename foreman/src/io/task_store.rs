//! File-backed task records (`.foreman/tasks/<task-id>.json`).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, instrument};

use super::atomic::{create_json, write_json};
use super::ids::sequence_number;
use super::store::{list_records, load_record, record_paths};
use crate::core::transitions::is_allowed;
use crate::core::types::{Task, TaskStatus};
use crate::error::StoreError;

const KIND: &str = "task";
const ID_PREFIX: &str = "task";

/// Fields supplied by whoever files a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub deps: Vec<String>,
    pub tags: Vec<String>,
    pub priority: i32,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persist a new `open` task under the next free `task-NNNN` id.
    #[instrument(skip_all, fields(title = %new.title))]
    pub fn create(&self, new: NewTask) -> Result<Task> {
        let mut next = self.max_sequence()? + 1;
        let now = Utc::now();
        let mut task = Task {
            id: String::new(),
            title: new.title,
            description: new.description,
            status: TaskStatus::Open,
            assigned_to: None,
            branch: None,
            deps: new.deps,
            tags: new.tags,
            priority: new.priority,
            result: None,
            checkpoint: None,
            created_at: now,
            updated_at: now,
        };
        loop {
            task.id = format!("{ID_PREFIX}-{next:04}");
            // Concurrent creators never share an id, and a crash never leaves
            // a half-written record behind.
            if create_json(&self.path(&task.id), &task)? {
                debug!(task = %task.id, "task created");
                return Ok(task);
            }
            next += 1;
        }
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        load_record(&self.dir, KIND, id)
    }

    /// All readable tasks in creation order.
    pub fn list(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = list_records(&self.dir)?;
        // File names stop sorting numerically past `task-9999`.
        tasks.sort_by_key(|task| sequence_number(&task.id, ID_PREFIX).unwrap_or(u64::MAX));
        Ok(tasks)
    }

    /// `open -> assigned`, recording the owner and branch.
    pub fn assign(&self, id: &str, agent_id: &str, branch: &str) -> Result<Task> {
        self.transition(id, TaskStatus::Assigned, |task| {
            task.assigned_to = Some(agent_id.to_string());
            task.branch = Some(branch.to_string());
        })
    }

    /// `assigned -> in_progress`.
    pub fn start(&self, id: &str) -> Result<Task> {
        self.transition(id, TaskStatus::InProgress, |_| {})
    }

    pub fn complete(&self, id: &str, result: Option<String>) -> Result<Task> {
        self.transition(id, TaskStatus::Done, |task| {
            if result.is_some() {
                task.result = result;
            }
        })
    }

    pub fn fail(&self, id: &str, reason: Option<String>) -> Result<Task> {
        self.transition(id, TaskStatus::Failed, |task| {
            if reason.is_some() {
                task.result = reason;
            }
        })
    }

    /// Record the latest self-reported progress note. Status is unchanged.
    pub fn set_checkpoint(&self, id: &str, note: &str) -> Result<Task> {
        let mut task = self.get(id)?;
        task.checkpoint = Some(note.to_string());
        task.updated_at = Utc::now();
        self.save(&task)?;
        Ok(task)
    }

    /// Force a task back to `open`, clearing owner and branch.
    ///
    /// Skips transition validation; only crash recovery and liveness
    /// retirement may call this.
    #[instrument(skip_all, fields(task = id))]
    pub(crate) fn reclaim(&self, id: &str) -> Result<Task> {
        let mut task = self.get(id)?;
        debug!(from = %task.status, "reclaiming task");
        task.status = TaskStatus::Open;
        task.assigned_to = None;
        task.branch = None;
        task.updated_at = Utc::now();
        self.save(&task)?;
        Ok(task)
    }

    fn transition(
        &self,
        id: &str,
        to: TaskStatus,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Task> {
        let mut task = self.get(id)?;
        if !is_allowed(task.status, to) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to,
            }
            .into());
        }
        task.status = to;
        mutate(&mut task);
        task.updated_at = Utc::now();
        self.save(&task)?;
        debug!(task = id, status = %to, "task transitioned");
        Ok(task)
    }

    fn save(&self, task: &Task) -> Result<()> {
        write_json(&self.path(&task.id), task)
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn max_sequence(&self) -> Result<u64> {
        Ok(record_paths(&self.dir)?
            .iter()
            .filter_map(|path| file_stem(path))
            .filter_map(|stem| sequence_number(&stem, ID_PREFIX))
            .max()
            .unwrap_or(0))
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
