//! Side-effecting collaborators: filesystem stores, git, tmux sessions.

pub mod agent_store;
pub mod artifacts;
pub mod atomic;
pub mod config;
pub mod event_log;
pub mod git;
pub mod ids;
pub mod instance_lock;
pub mod merge_queue;
pub mod message_store;
pub mod paths;
pub mod process;
pub mod runtime;
pub mod store;
pub mod task_store;
pub mod vcs;
