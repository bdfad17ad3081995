//! Tick step 7: report global limits that are currently exceeded.

use anyhow::Result;
use serde_json::json;
use tracing::{instrument, warn};

use crate::admission::active_workers;
use crate::core::admission::check_budget;
use crate::core::types::{Event, EventKind};
use crate::io::event_log::total_cost;
use crate::tick::{TickContext, TickEvents};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ConstraintReport {
    pub budget_exceeded: bool,
    pub workers_over_cap: bool,
}

/// True when the latest `budget_exceeded` event has no cost-bearing event
/// after it, i.e. the current crossing was already reported.
pub fn budget_already_reported(events: &[Event]) -> bool {
    let Some(last) = events
        .iter()
        .rposition(|event| event.kind == EventKind::BudgetExceeded)
    else {
        return false;
    };
    events[last + 1..].iter().all(|event| event.cost().is_none())
}

#[instrument(skip_all)]
pub fn check_constraints(ctx: &TickContext<'_>, events: &mut TickEvents) -> Result<ConstraintReport> {
    let limits = ctx.config.limits();
    let mut report = ConstraintReport::default();

    // Include what this tick produced but has not flushed yet.
    let mut history = ctx.project.events.read_all()?;
    history.extend_from_slice(events.as_slice());
    let spent = total_cost(&history);

    if let Some(denial) = check_budget(&limits, spent)
        && !budget_already_reported(&history)
    {
        warn!(%denial, "budget ceiling reached");
        events.push(Event::new(EventKind::BudgetExceeded).data(json!({
            "spent": spent,
            "ceiling": limits.budget_ceiling,
        })));
        report.budget_exceeded = true;
    }

    let active = active_workers(ctx.project)?;
    if active > limits.max_workers {
        warn!(active, max = limits.max_workers, "more active workers than the configured cap");
        report.workers_over_cap = true;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(cost: f64) -> Event {
        Event::new(EventKind::Usage).data(json!({ "cost": cost }))
    }

    #[test]
    fn nothing_reported_yet() {
        assert!(!budget_already_reported(&[usage(1.0), usage(2.0)]));
    }

    #[test]
    fn report_stands_until_more_spend() {
        let mut events = vec![
            usage(6.0),
            Event::new(EventKind::BudgetExceeded),
            Event::new(EventKind::DaemonStarted),
        ];
        assert!(budget_already_reported(&events));

        events.push(usage(0.5));
        assert!(!budget_already_reported(&events));
    }

    #[test]
    fn only_the_latest_report_counts() {
        let events = vec![
            Event::new(EventKind::BudgetExceeded),
            usage(1.0),
            Event::new(EventKind::BudgetExceeded),
        ];
        assert!(budget_already_reported(&events));
    }
}
