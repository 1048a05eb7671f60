//! Background sampling loop feeding a [`SampleRegistry`].
//!
//! The collector probes as fast as its inter-iteration delay allows,
//! independent of how often the registry is checked. It exits within one
//! iteration once its context is cancelled or expires.

use std::sync::Arc;
use std::time::Duration;

use swarmnet_reconcile::ScenarioContext;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, trace};

use crate::probe::Probe;
use crate::registry::SampleRegistry;

/// Default pause between two probes.
pub const DEFAULT_SAMPLE_DELAY: Duration = Duration::from_millis(5);

/// Outcome counters of one collector run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Samples added to the registry.
    pub recorded: u64,

    /// Probes that failed and were skipped.
    pub dropped: u64,
}

/// Repeatedly probes an endpoint and records which backend answered.
pub struct SampleCollector {
    probe: Arc<dyn Probe>,
    registry: Arc<SampleRegistry>,
    delay: Duration,
}

impl SampleCollector {
    /// Create a collector writing into `registry`.
    pub fn new(probe: Arc<dyn Probe>, registry: Arc<SampleRegistry>) -> Self {
        Self {
            probe,
            registry,
            delay: DEFAULT_SAMPLE_DELAY,
        }
    }

    /// Override the pause between probes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run the loop on its own task.
    pub fn spawn(self, ctx: ScenarioContext) -> CollectorHandle {
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move { self.run(task_ctx).await });
        CollectorHandle { ctx, task }
    }

    /// Run the loop until `ctx` is done or the registry is closed.
    ///
    /// The registry is closed on exit.
    pub async fn run(self, ctx: ScenarioContext) -> CollectorStats {
        info!(
            delay_ms = self.delay.as_millis() as u64,
            "Starting sample collector"
        );

        let mut stats = CollectorStats::default();

        loop {
            if ctx.done_reason().is_some() {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = ctx.done() => break,
                outcome = self.probe.sample() => outcome,
            };

            match outcome {
                Ok(identity) => {
                    if ctx.is_cancelled() {
                        break;
                    }
                    let Some(count) = self.registry.record_hit(&identity) else {
                        debug!("Registry closed, stopping collector");
                        break;
                    };
                    stats.recorded += 1;
                    trace!(identity = %identity, count, "Recorded sample");
                }
                Err(e) => {
                    stats.dropped += 1;
                    trace!(error = %e, "Dropped sample");
                }
            }

            tokio::select! {
                biased;
                _ = ctx.done() => break,
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        self.registry.close();
        debug!(
            recorded = stats.recorded,
            dropped = stats.dropped,
            reason = ?ctx.done_reason(),
            "Sample collector stopped"
        );
        stats
    }
}

/// Handle to a spawned [`SampleCollector`].
pub struct CollectorHandle {
    ctx: ScenarioContext,
    task: JoinHandle<CollectorStats>,
}

impl CollectorHandle {
    /// Returns true once the collector task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the collector's context and wait for the task to exit.
    pub async fn stop(self) -> Result<CollectorStats, JoinError> {
        self.ctx.cancel();
        self.task.await
    }
}
