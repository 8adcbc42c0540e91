//! Background schedules — retention cleanup and threat analysis.
//!
//! Both run as tokio tasks on fixed intervals, independent of the request
//! path. They stop on [`Schedules::shutdown`]; dropping [`Schedules`]
//! aborts whatever is still running, so no timer outlives its owner.

use crate::ledger::ThreatLedger;
use crate::rate_limit::RateLimiter;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Handles to the running schedule tasks.
pub struct Schedules {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Schedules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedules")
            .field("tasks", &self.handles.len())
            .finish()
    }
}

impl Schedules {
    /// Spawn the cleanup and analysis loops. Must be called within a tokio runtime.
    pub fn spawn(
        ledger: Arc<ThreatLedger>,
        limiter: Arc<RateLimiter>,
        cleanup_every: Duration,
        analysis_every: Duration,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let cleanup_ledger = ledger.clone();
        let cleanup = spawn_periodic("cleanup", cleanup_every, rx.clone(), move || {
            let now = Utc::now();
            let events = cleanup_ledger.cleanup_at(now);
            let windows = limiter.prune_expired(now);
            debug!(events, windows, "Cleanup pass finished");
        });

        let analysis = spawn_periodic("threat_analysis", analysis_every, rx, move || {
            let blocked = ledger.analyze_at(Utc::now());
            if !blocked.is_empty() {
                info!(count = blocked.len(), ips = ?blocked, "Threat analysis blocked IPs");
            }
        });

        info!(
            cleanup_secs = cleanup_every.as_secs(),
            analysis_secs = analysis_every.as_secs(),
            "Security schedules started"
        );

        Self {
            shutdown,
            handles: vec![cleanup, analysis],
        }
    }

    /// Signal both loops to stop and wait for them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.await;
        }
        info!("Security schedules stopped");
    }
}

impl Drop for Schedules {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        // First run one full period after start
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "Schedule loop exited");
    })
}
