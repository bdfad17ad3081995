//! Shared record types for the orchestration core.
//!
//! These are the persisted shapes of tasks, agents, messages, events and
//! merge-queue entries. They carry no I/O; the `io` stores serialize them as
//! one JSON document per record (events as one JSON object per line).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a task: `open -> assigned -> in_progress -> {done, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Assigned,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// Held by a live agent (`assigned` or `in_progress`).
    pub fn is_claimed(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub result: Option<String>,
    /// Latest self-reported progress note.
    #[serde(default)]
    pub checkpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Worker,
    /// Interactively supervised; exempt from liveness checks.
    Liaison,
    Resolver,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Worker => "worker",
            AgentRole::Liaison => "liaison",
            AgentRole::Resolver => "resolver",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Dead,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staged escalation for a non-responsive agent. Ordered: `None < Warning < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    #[default]
    None,
    Warning,
    Critical,
}

/// A running worker, liaison or resolver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub worktree: Option<PathBuf>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub last_progress: Option<String>,
    #[serde(default)]
    pub escalation: EscalationLevel,
    #[serde(default)]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stall_notice_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Fresh active agent with no heartbeat yet.
    pub fn new(id: impl Into<String>, role: AgentRole, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role,
            status: AgentStatus::Active,
            task_id: None,
            branch: None,
            worktree: None,
            session: None,
            pid: None,
            heartbeat_at: None,
            started_at: now,
            last_progress: None,
            escalation: EscalationLevel::None,
            escalated_at: None,
            stall_notice_at: None,
        }
    }

    /// Time since the last heartbeat (or since start when none was seen yet).
    pub fn staleness(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.heartbeat_at.unwrap_or(self.started_at), now)
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// Non-negative wall-clock distance between two instants (clock skew clamps to zero).
pub fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    to.signed_duration_since(from)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TaskDone,
    TaskFailed,
    MergeResult,
    Help,
    Checkpoint,
    UserMessage,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::TaskDone => "task_done",
            MessageKind::TaskFailed => "task_failed",
            MessageKind::MergeResult => "merge_result",
            MessageKind::Help => "help",
            MessageKind::Checkpoint => "checkpoint",
            MessageKind::UserMessage => "user_message",
        }
    }
}

/// Addressed, typed, asynchronous communication between agents and the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Read a string field from the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskDone,
    TaskFailed,
    TaskReclaimed,
    AgentSpawned,
    AgentWarning,
    AgentCritical,
    AgentDied,
    AgentStalled,
    HelpRequested,
    MergeStarted,
    MergeSucceeded,
    MergeFailed,
    MergeConflict,
    ResolverSpawned,
    ResolverResolved,
    Usage,
    BudgetExceeded,
    DaemonStarted,
    DaemonStopped,
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
            agent: None,
            task: None,
            data: None,
        }
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Numeric `cost` carried in the payload, used for budget accounting.
    pub fn cost(&self) -> Option<f64> {
        self.data
            .as_ref()
            .and_then(|data| data.get("cost"))
            .and_then(Value::as_f64)
    }
}

/// A pending request to integrate `branch` into the trunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeQueueEntry {
    /// Sortable id; lexicographic order equals enqueue order.
    pub id: String,
    pub task_id: String,
    pub branch: String,
    pub agent_id: String,
    pub enqueued_at: DateTime<Utc>,
}
