//! Liveness classification and escalation decisions for autonomous agents.
//!
//! Pure functions: the tick step feeds in process existence, heartbeat
//! staleness and the persisted escalation level, and applies the returned
//! action.

use std::time::Duration;

use crate::core::types::EscalationLevel;

/// Staleness thresholds. Invariant: `warn < critical < dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warn: Duration,
    pub critical: Duration,
    pub dead: Duration,
}

/// Where an agent sits given `(process_alive, staleness)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    Warning,
    Critical,
    Dead,
}

/// Map process existence and heartbeat staleness to exactly one state.
///
/// A missing process is dead regardless of staleness.
pub fn classify(process_alive: bool, staleness: Duration, thresholds: &Thresholds) -> Liveness {
    if !process_alive {
        return Liveness::Dead;
    }
    if staleness <= thresholds.warn {
        Liveness::Healthy
    } else if staleness <= thresholds.critical {
        Liveness::Warning
    } else if staleness <= thresholds.dead {
        Liveness::Critical
    } else {
        Liveness::Dead
    }
}

/// What the liveness step must do for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    Nothing,
    /// Fresh heartbeat after an escalation: reset to healthy.
    ClearEscalation,
    RaiseWarning,
    RaiseCritical,
    /// Mark dead, reclaim the task, release resources.
    Retire,
}

/// Decide the transition from the persisted level. Escalation never moves
/// down except through [`LivenessAction::ClearEscalation`].
pub fn next_action(current: EscalationLevel, liveness: Liveness) -> LivenessAction {
    match liveness {
        Liveness::Healthy if current != EscalationLevel::None => LivenessAction::ClearEscalation,
        Liveness::Healthy => LivenessAction::Nothing,
        Liveness::Warning if current < EscalationLevel::Warning => LivenessAction::RaiseWarning,
        Liveness::Critical if current < EscalationLevel::Critical => LivenessAction::RaiseCritical,
        Liveness::Warning | Liveness::Critical => LivenessAction::Nothing,
        Liveness::Dead => LivenessAction::Retire,
    }
}

/// Stall notices fire once `idle` exceeds `threshold`, at most once per window.
pub fn stall_due(idle: Duration, since_last_notice: Option<Duration>, threshold: Duration) -> bool {
    if idle <= threshold {
        return false;
    }
    match since_last_notice {
        Some(age) => age > threshold,
        None => true,
    }
}
