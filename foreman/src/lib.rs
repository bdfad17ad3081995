//! Multi-agent work orchestrator.
//!
//! A daemon that hands tasks to autonomous worker sessions, watches them,
//! and folds their branches back into a shared trunk. All state lives in
//! files under `.foreman/`, so the daemon is stateless between ticks and can
//! be restarted at any time. The code is split as follows:
//!
//! - **[`core`]**: Pure logic (readiness, admission, liveness classification,
//!   task transitions, conflict parsing). No I/O.
//! - **[`io`]**: Stores, event log, merge queue, git, tmux, config and
//!   rendered artifacts.
//!
//! Orchestration modules ([`liveness`], [`assign`], [`inbox`], [`merge`],
//! [`resolver`], [`constraints`]) are the tick steps; [`scheduler`] runs them
//! in order and [`daemon`] drives the scheduler on an interval.

pub mod admission;
pub mod assign;
pub mod constraints;
pub mod core;
pub mod daemon;
pub mod error;
pub mod exit_codes;
pub mod inbox;
pub mod io;
pub mod liveness;
pub mod logging;
pub mod merge;
pub mod project;
pub mod reconcile;
mod release;
pub mod resolver;
pub mod scheduler;
pub mod shutdown;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tick;
