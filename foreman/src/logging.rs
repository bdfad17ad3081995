//! Diagnostic tracing for the daemon and CLI.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted.
//!
//! - **Event log (`io/event_log`)**: The audit trail in `.foreman/events.jsonl`.
//!   Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "foreman=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `foreman=info`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=foreman=debug foreman run
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
