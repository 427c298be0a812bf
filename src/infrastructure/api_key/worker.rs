//! Background sweeps
//!
//! A [`SweepWorker`] runs one [`Sweep`] on a fixed period until it is
//! stopped. Failures are logged and counted; the next tick runs again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::anomaly::AnomalyDetector;
use super::store::KeyStore;
use crate::domain::{Clock, DomainError};
use crate::infrastructure::observability::record_sweep;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records the pass acted on
    pub affected: usize,
    /// Records the pass failed to act on
    pub failed: usize,
}

/// A unit of periodic background work
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Stable name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn run(&self, now: DateTime<Utc>) -> Result<SweepSummary, DomainError>;
}

/// Handle to a running sweep loop
#[derive(Debug)]
pub struct SweepWorker {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweepWorker {
    /// Spawn the loop; the first pass runs immediately
    ///
    /// Cancelling `parent` stops this worker too.
    pub fn start(
        sweep: Arc<dyn Sweep>,
        clock: Arc<dyn Clock>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let name = sweep.name();
        let cancel = parent.child_token();
        let handle = tokio::spawn(run_loop(sweep, clock, period, cancel.clone()));

        info!(sweep = name, period_secs = period.as_secs(), "Sweep worker started");

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait for an in-flight pass to finish
    pub async fn stop(self) {
        self.cancel.cancel();

        if let Err(e) = self.handle.await {
            warn!(sweep = self.name, error = %e, "Sweep worker ended abnormally");
        }

        info!(sweep = self.name, "Sweep worker stopped");
    }
}

async fn run_loop(
    sweep: Arc<dyn Sweep>,
    clock: Arc<dyn Clock>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                run_pass(sweep.as_ref(), clock.now()).await;
            }
        }
    }
}

async fn run_pass(sweep: &dyn Sweep, now: DateTime<Utc>) {
    match sweep.run(now).await {
        Ok(summary) => {
            record_sweep(sweep.name(), summary.failed == 0);
            debug!(
                sweep = sweep.name(),
                affected = summary.affected,
                failed = summary.failed,
                "Sweep pass completed"
            );
        }
        Err(e) => {
            record_sweep(sweep.name(), false);
            warn!(sweep = sweep.name(), error = %e, "Sweep pass failed; retrying next cycle");
        }
    }
}

/// Evicts stale usage windows and re-checks high usage for live keys
#[derive(Debug)]
pub struct AnomalyScan {
    store: Arc<KeyStore>,
    detector: Arc<AnomalyDetector>,
}

impl AnomalyScan {
    pub fn new(store: Arc<KeyStore>, detector: Arc<AnomalyDetector>) -> Self {
        Self { store, detector }
    }
}

#[async_trait]
impl Sweep for AnomalyScan {
    fn name(&self) -> &'static str {
        "anomaly_scan"
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<SweepSummary, DomainError> {
        let pruned = self.detector.tracker().prune(now);
        let keys = self.store.live_keys();
        let flagged = self.detector.scan(&keys, now);
        self.detector.prune_alerts(now);

        if pruned > 0 {
            debug!(pruned, "Dropped idle usage windows");
        }

        Ok(SweepSummary {
            affected: flagged,
            failed: 0,
        })
    }
}
