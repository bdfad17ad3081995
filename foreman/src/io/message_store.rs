//! Per-recipient inboxes (`.foreman/messages/<to>/`) with an archive for
//! consumed messages (`.foreman/archive/<to>/`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::atomic::write_json;
use super::ids::{sortable_id, validate_name};
use super::store::list_records;
use crate::core::types::{Message, MessageKind};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct MessageStore {
    inbox_dir: PathBuf,
    archive_dir: PathBuf,
}

impl MessageStore {
    pub fn new(inbox_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// Drop a message into `to`'s inbox.
    pub fn send(
        &self,
        kind: MessageKind,
        from: &str,
        to: &str,
        task_id: Option<&str>,
        payload: Value,
    ) -> Result<Message> {
        validate_name("recipient", to)?;
        let message = Message {
            id: sortable_id(),
            kind,
            from: from.to_string(),
            to: to.to_string(),
            task_id: task_id.map(str::to_string),
            payload,
            created_at: Utc::now(),
        };
        write_json(&message_path(&self.inbox_dir, &message), &message)?;
        debug!(id = %message.id, kind = kind.as_str(), from, to, "message sent");
        Ok(message)
    }

    /// Unconsumed messages for `recipient`, oldest first.
    pub fn list_pending(&self, recipient: &str) -> Result<Vec<Message>> {
        validate_name("recipient", recipient)?;
        list_records(&self.inbox_dir.join(recipient))
    }

    /// Archived messages for `recipient`, oldest first.
    pub fn list_archived(&self, recipient: &str) -> Result<Vec<Message>> {
        validate_name("recipient", recipient)?;
        list_records(&self.archive_dir.join(recipient))
    }

    /// Move a consumed message out of the inbox so it is never re-delivered.
    pub fn archive(&self, message: &Message) -> Result<()> {
        let from = message_path(&self.inbox_dir, message);
        if !from.is_file() {
            return Err(StoreError::NotFound {
                kind: "message",
                id: message.id.clone(),
            }
            .into());
        }
        let to = message_path(&self.archive_dir, message);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::rename(&from, &to)
            .with_context(|| format!("archive {} to {}", from.display(), to.display()))?;
        debug!(id = %message.id, to = %message.to, "message archived");
        Ok(())
    }
}

fn message_path(base: &Path, message: &Message) -> PathBuf {
    base.join(&message.to).join(format!("{}.json", message.id))
}
