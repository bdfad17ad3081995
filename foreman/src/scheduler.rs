//! The tick: seven steps in a fixed order over persisted state.
//!
//! 1. liveness escalation
//! 2. stall detection
//! 3. assignment of ready tasks
//! 4. inbox processing
//! 5. merge-queue drain
//! 6. resolver polling
//! 7. constraint check
//!
//! Each step is isolated: a failing step is logged and the tick moves on.
//! Events from all steps are flushed to the log once, at the end.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::assign::{AssignReport, assign_ready};
use crate::constraints::{ConstraintReport, check_constraints};
use crate::inbox::{InboxReport, process_inbox};
use crate::io::config::ForemanConfig;
use crate::io::runtime::AgentRuntime;
use crate::io::vcs::VersionControl;
use crate::liveness::{LivenessReport, check_liveness, check_stalls};
use crate::merge::{MergeReport, drain_merge_queue};
use crate::project::Project;
use crate::reconcile::{ReconcileReport, reconcile};
use crate::resolver::poll_resolvers;
use crate::shutdown::ShutdownFlag;
use crate::tick::{TickContext, TickEvents};

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub liveness: LivenessReport,
    pub stalled: usize,
    pub assign: AssignReport,
    pub inbox: InboxReport,
    pub merge: MergeReport,
    pub resolved: usize,
    pub constraints: ConstraintReport,
    /// Events appended to the log by this tick.
    pub events: usize,
}

pub struct Scheduler<R: AgentRuntime, V: VersionControl> {
    project: Project,
    runtime: R,
    vcs: V,
    shutdown: ShutdownFlag,
}

impl<R: AgentRuntime, V: VersionControl> Scheduler<R, V> {
    pub fn new(project: Project, runtime: R, vcs: V) -> Self {
        Self {
            project,
            runtime,
            vcs,
            shutdown: ShutdownFlag::new(),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Request a graceful stop. Safe to call any number of times.
    pub fn stop(&self) {
        if self.shutdown.request() {
            info!("shutdown requested");
        }
    }

    fn context<'a>(&'a self, config: &'a ForemanConfig) -> TickContext<'a> {
        TickContext {
            project: &self.project,
            config,
            runtime: &self.runtime,
            vcs: &self.vcs,
            shutdown: &self.shutdown,
            now: Utc::now(),
        }
    }

    /// Startup recovery; see [`crate::reconcile`].
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let config = self.project.load_config()?;
        let ctx = self.context(&config);
        let mut events = TickEvents::new();
        let report = reconcile(&ctx, &mut events)?;
        events.flush(&self.project.events)?;
        Ok(report)
    }

    /// Run one tick. Only an unreadable config or an unwritable event log
    /// fail the tick as a whole.
    #[instrument(skip_all)]
    pub fn tick(&self) -> Result<TickReport> {
        let config = self
            .project
            .load_config()
            .context("load config, tick skipped")?;
        let ctx = self.context(&config);
        let mut events = TickEvents::new();

        let mut report = TickReport {
            liveness: isolated("liveness", check_liveness(&ctx, &mut events)),
            stalled: isolated("stalls", check_stalls(&ctx, &mut events)),
            assign: isolated("assign", assign_ready(&ctx, &mut events)),
            inbox: isolated("inbox", process_inbox(&ctx, &mut events)),
            merge: isolated("merge", drain_merge_queue(&ctx, &mut events)),
            resolved: isolated("resolvers", poll_resolvers(&ctx, &mut events)),
            constraints: isolated("constraints", check_constraints(&ctx, &mut events)),
            events: 0,
        };
        report.events = events
            .flush(&self.project.events)
            .context("append tick events")?;
        debug!(?report, "tick finished");
        Ok(report)
    }
}

fn isolated<T: Default>(step: &str, result: Result<T>) -> T {
    result.unwrap_or_else(|err| {
        warn!(step, err = format!("{err:#}"), "tick step failed");
        T::default()
    })
}
