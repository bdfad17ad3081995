//! Dependency resolution for open tasks.

use std::collections::HashMap;

use crate::core::types::{Task, TaskStatus};

/// Return every `open` task whose dependencies are all `done`, in input order.
///
/// A dependency that does not exist counts as not done: the task stays
/// blocked rather than erroring.
pub fn find_ready(tasks: &[Task]) -> Vec<&Task> {
    let status_by_id: HashMap<&str, TaskStatus> = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.status))
        .collect();

    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Open)
        .filter(|task| {
            task.deps
                .iter()
                .all(|dep| status_by_id.get(dep.as_str()) == Some(&TaskStatus::Done))
        })
        .collect()
}

/// Order ready tasks for assignment: higher `priority` first, ties keep input order.
pub fn assignment_order<'a>(mut ready: Vec<&'a Task>) -> Vec<&'a Task> {
    ready.sort_by(|a, b| b.priority.cmp(&a.priority));
    ready
}
