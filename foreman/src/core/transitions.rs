//! Task status transition rules.
//!
//! Status only moves forward along `open -> assigned -> in_progress ->
//! {done, failed}`. An assigned task may complete without reporting
//! `in_progress` first. Anything else (including same-state writes and every
//! move out of a terminal state) is rejected; the crash-recovery reclaim path
//! bypasses these rules on purpose and lives in the task store.

use crate::core::types::TaskStatus;

/// True if `from -> to` is a legal task transition.
pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::{Assigned, Done, Failed, InProgress, Open};
    matches!(
        (from, to),
        (Open, Assigned)
            | (Assigned, InProgress)
            | (Assigned, Done)
            | (Assigned, Failed)
            | (InProgress, Done)
            | (InProgress, Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::{Assigned, Done, Failed, InProgress, Open};

    const ALL: [TaskStatus; 5] = [Open, Assigned, InProgress, Done, Failed];

    #[test]
    fn forward_chain_is_allowed() {
        assert!(is_allowed(Open, Assigned));
        assert!(is_allowed(Assigned, InProgress));
        assert!(is_allowed(InProgress, Done));
        assert!(is_allowed(InProgress, Failed));
    }

    #[test]
    fn assigned_task_may_finish_directly() {
        assert!(is_allowed(Assigned, Done));
        assert!(is_allowed(Assigned, Failed));
    }

    /// Terminal states never move, whatever the target.
    #[test]
    fn terminal_states_are_final() {
        for to in ALL {
            assert!(!is_allowed(Done, to), "done -> {to}");
            assert!(!is_allowed(Failed, to), "failed -> {to}");
        }
    }

    #[test]
    fn backwards_and_skipping_moves_are_rejected() {
        assert!(!is_allowed(Assigned, Open));
        assert!(!is_allowed(InProgress, Open));
        assert!(!is_allowed(InProgress, Assigned));
        assert!(!is_allowed(Open, InProgress));
        assert!(!is_allowed(Open, Done));
        assert!(!is_allowed(Open, Failed));
    }

    #[test]
    fn same_state_is_rejected() {
        for status in ALL {
            assert!(!is_allowed(status, status), "{status} -> {status}");
        }
    }
}
