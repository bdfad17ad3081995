//! Admission control for spawning new workers.
//!
//! Three independent ceilings, evaluated in a fixed order: budget, then
//! active workers, then merge-queue depth. The first failing check wins.

use std::fmt;

/// Configured ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub budget_ceiling: f64,
    pub max_workers: usize,
    pub max_queue_depth: usize,
}

/// Current occupancy, re-derived from persisted state on every check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub spent: f64,
    pub active_workers: usize,
    pub queue_depth: usize,
}

/// Why a spawn was refused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Denial {
    Budget { spent: f64, ceiling: f64 },
    Workers { active: usize, max: usize },
    QueueDepth { depth: usize, max: usize },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Budget { spent, ceiling } => {
                write!(f, "budget exhausted: spent {spent:.2} of {ceiling:.2}")
            }
            Denial::Workers { active, max } => {
                write!(f, "worker cap reached: {active} active of {max}")
            }
            Denial::QueueDepth { depth, max } => {
                write!(f, "merge queue full: {depth} pending of {max}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed,
    Denied(Denial),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

pub fn check_budget(limits: &Limits, spent: f64) -> Option<Denial> {
    (spent >= limits.budget_ceiling).then_some(Denial::Budget {
        spent,
        ceiling: limits.budget_ceiling,
    })
}

pub fn check_workers(limits: &Limits, active: usize) -> Option<Denial> {
    (active >= limits.max_workers).then_some(Denial::Workers {
        active,
        max: limits.max_workers,
    })
}

pub fn check_queue(limits: &Limits, depth: usize) -> Option<Denial> {
    (depth >= limits.max_queue_depth).then_some(Denial::QueueDepth {
        depth,
        max: limits.max_queue_depth,
    })
}

/// Evaluate all ceilings against a full usage snapshot.
pub fn evaluate(limits: &Limits, usage: &Usage) -> Admission {
    check_budget(limits, usage.spent)
        .or_else(|| check_workers(limits, usage.active_workers))
        .or_else(|| check_queue(limits, usage.queue_depth))
        .map_or(Admission::Allowed, Admission::Denied)
}
