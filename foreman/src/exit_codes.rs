//! Stable exit codes for foreman CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, missing project, bad config, or any other failure.
pub const INVALID: i32 = 1;
/// `foreman run` found another daemon holding the project lock.
pub const LOCKED: i32 = 2;
