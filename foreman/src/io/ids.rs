//! Identifier allocation for file-backed records.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::error::StoreError;

static LAST_NANOS: AtomicU64 = AtomicU64::new(0);

/// Time-derived id whose lexicographic order equals creation order.
///
/// 20-digit zero-padded nanoseconds since the epoch, strictly increasing
/// within this process, suffixed with the pid so ids minted by separate
/// processes in the same nanosecond stay distinct.
pub fn sortable_id() -> String {
    let now = u64::try_from(Utc::now().timestamp_nanos_opt().unwrap_or_default()).unwrap_or(0);
    let prev = LAST_NANOS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or(now);
    let nanos = now.max(prev.saturating_add(1));
    format!("{nanos:020}-{}", std::process::id())
}

/// Reject names that are unsafe as a single path component.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Parse the numeric suffix of `<prefix>-<n>` ids (e.g. `worker-12`).
pub fn sequence_number(id: &str, prefix: &str) -> Option<u64> {
    id.strip_prefix(prefix)?.strip_prefix('-')?.parse().ok()
}
