//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! records and return decisions the tick steps then apply through `io`.

pub mod admission;
pub mod conflict;
pub mod liveness;
pub mod readiness;
pub mod transitions;
pub mod types;
