//! Fixed-interval poll loop.
//!
//! Shutdown is observed only between cycles: a cycle that has started
//! always runs to completion, bookkeeping included.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::worker::orchestrator::Orchestrator;
use crate::worker::state::CycleReport;

/// Spawn the poll loop. The first cycle runs immediately.
///
/// Returns a `JoinHandle` and a shutdown sender. Send `true` (or drop the
/// sender) and await the handle; the loop exits at the next tick boundary.
pub fn spawn_poll_loop(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "Auto-reply poller started");
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err() {
                info!("Auto-reply poller shutting down");
                return;
            }

            // Own task per cycle so a panic ends only that cycle.
            let cycle = Arc::clone(&orchestrator);
            match tokio::spawn(async move { cycle.run_cycle().await }).await {
                Ok(report) => log_report(&report),
                Err(e) => error!(error = %e, "Poll cycle aborted"),
            }
        }
    });

    (handle, shutdown_tx)
}

fn log_report(report: &CycleReport) {
    match report {
        CycleReport::Overlapped => warn!("Poll tick dropped, previous cycle still running"),
        CycleReport::Disabled { reason } => debug!(%reason, "Auto-reply disabled"),
        CycleReport::Bootstrapped { cursor } => info!(%cursor, "Poller bootstrapped"),
        CycleReport::NoChange { .. } => debug!("No new mail"),
        CycleReport::Reset { previous, cursor } => warn!(
            previous = ?previous.map(|c| c.position()),
            %cursor,
            "Cursor reset"
        ),
        CycleReport::FetchFailed { error } => warn!(%error, "Poll cycle failed to fetch"),
        CycleReport::Processed { cursor, outcomes } => debug!(
            %cursor,
            events = outcomes.len(),
            replied = report.replied(),
            "Batch processed"
        ),
    }
}
