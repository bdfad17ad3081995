//! Typed failures that callers branch on.
//!
//! Everything else travels as `anyhow::Error`; these are wrapped inside it and
//! recovered with `err.downcast_ref::<StoreError>()` where the distinction
//! matters (e.g. a missing dependency vs. a corrupt record).

use thiserror::Error;

use crate::core::types::TaskStatus;

/// Record-level failures from the task/agent/message stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("task '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },
}

/// Merge-queue admission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// At most one outstanding entry may exist per task.
    #[error("task '{task_id}' already has a pending merge-queue entry")]
    DuplicateEntry { task_id: String },
}

/// Single-instance lock failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("another foreman daemon already holds {path}")]
    AlreadyRunning { path: String },
}

/// True when `err` wraps a [`StoreError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::NotFound { .. })
    )
}
