//! Periodic execution of the session sweep.

use queue_salvage_core::SessionSweep;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Runs a sweep pass on a fixed interval until told to stop
pub struct SweepScheduler {
    sweep: Arc<SessionSweep>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(sweep: Arc<SessionSweep>, interval: Duration) -> Self {
        Self { sweep, interval }
    }

    /// Sweep immediately and then every interval until `shutdown` completes
    ///
    /// A pass in progress is finished before shutdown is honoured. Returns the
    /// number of passes run.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_seconds = self.interval.as_secs(),
            "Session sweep scheduler started"
        );

        let mut passes = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    passes += 1;
                    match self.sweep.run_once().await {
                        Ok(report) if !report.skipped.is_empty() => {
                            info!(
                                pass = passes,
                                skipped = report.skipped.len(),
                                "Sweep left sessions for the next pass"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(pass = passes, error = %e, "Sweep pass failed");
                        }
                    }
                }
            }
        }

        info!(passes, "Session sweep scheduler stopped");
        passes
    }
}

/// Completes on Ctrl-C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
