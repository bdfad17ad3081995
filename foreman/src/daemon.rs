//! `foreman run`: hold the instance lock, reconcile once, then tick on an
//! interval until a shutdown is requested. `foreman tick` takes the same
//! lock for a single tick, so it never overlaps a running daemon.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::block_in_place;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::core::types::{Event, EventKind};
use crate::io::config::ForemanConfig;
use crate::io::instance_lock::InstanceLock;
use crate::io::runtime::AgentRuntime;
use crate::io::vcs::VersionControl;
use crate::scheduler::{Scheduler, TickReport};
use crate::shutdown::ShutdownFlag;

/// Exit status used when a second signal cuts shutdown short.
const FORCED_EXIT: i32 = 130;

/// Run exactly one tick under the instance lock.
pub fn run_once<R: AgentRuntime, V: VersionControl>(scheduler: &Scheduler<R, V>) -> Result<TickReport> {
    let _lock = InstanceLock::acquire(&scheduler.project().paths.lock_path)?;
    scheduler.tick()
}

/// Run the daemon until stopped. Fails fast if another daemon holds the lock.
///
/// Must run on a multi-threaded tokio runtime: ticks execute synchronously
/// via `block_in_place`.
pub async fn run_forever<R: AgentRuntime, V: VersionControl>(scheduler: &Scheduler<R, V>) -> Result<()> {
    let project = scheduler.project();
    let _lock = InstanceLock::acquire(&project.paths.lock_path)?;
    tokio::spawn(listen_for_signals(scheduler.shutdown_flag().clone()));

    match block_in_place(|| scheduler.reconcile()) {
        Ok(report) => info!(?report, "reconciled"),
        Err(err) => warn!(err = format!("{err:#}"), "startup reconciliation failed"),
    }
    log_event(scheduler, Event::new(EventKind::DaemonStarted).data(json!({
        "pid": std::process::id(),
    })));

    let mut period = tick_period(scheduler);
    let mut ticker = new_ticker(period);
    let shutdown = scheduler.shutdown_flag();
    info!(period_secs = period.as_secs(), "daemon running");

    while !shutdown.is_requested() {
        tokio::select! {
            _ = ticker.tick() => {}
            () = shutdown.wait() => break,
        }
        if let Err(err) = block_in_place(|| scheduler.tick()) {
            error!(err = format!("{err:#}"), "tick failed");
        }
        // Operators may change the interval while the daemon runs.
        let next = tick_period(scheduler);
        if next != period {
            info!(from_secs = period.as_secs(), to_secs = next.as_secs(), "tick interval changed");
            period = next;
            ticker = new_ticker(period);
            ticker.reset();
        }
    }

    log_event(scheduler, Event::new(EventKind::DaemonStopped));
    info!("daemon stopped");
    Ok(())
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn tick_period<R: AgentRuntime, V: VersionControl>(scheduler: &Scheduler<R, V>) -> Duration {
    match scheduler.project().load_config() {
        Ok(config) => config.tick_interval(),
        Err(err) => {
            warn!(err = format!("{err:#}"), "config unreadable, using default tick interval");
            ForemanConfig::default().tick_interval()
        }
    }
}

fn log_event<R: AgentRuntime, V: VersionControl>(scheduler: &Scheduler<R, V>, event: Event) {
    if let Err(err) = scheduler.project().events.append(&event) {
        warn!(kind = ?event.kind, err = format!("{err:#}"), "failed to append event");
    }
}

/// First SIGINT/SIGTERM requests a graceful stop; the next one exits at once.
async fn listen_for_signals(flag: ShutdownFlag) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!(err = %err, "failed to install SIGTERM handler");
            None
        }
    };
    loop {
        let received = tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => "SIGINT",
                Err(err) => {
                    warn!(err = %err, "failed to listen for Ctrl+C");
                    return;
                }
            },
            Some(()) = recv(terminate.as_mut()) => "SIGTERM",
        };
        if flag.request() {
            info!(signal = received, "shutting down after the current tick");
        } else {
            warn!(signal = received, "second signal, exiting immediately");
            std::process::exit(FORCED_EXIT);
        }
    }
}

async fn recv(stream: Option<&mut tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}
