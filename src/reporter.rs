use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::state::{OrNa, Report, State};
use crate::storm::shutdown_requested;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Periodically logs registry size, average acquisition latency and the
/// observed creation rate.
#[derive(Debug)]
pub struct StatsReporter<C> {
    registry: Arc<Registry<C>>,
    metrics: Arc<Metrics>,
    period: Duration,
}

impl<C> StatsReporter<C> {
    pub fn new(registry: Arc<Registry<C>>, metrics: Arc<Metrics>, period: Duration) -> Self {
        Self {
            registry,
            metrics,
            period,
        }
    }

    /// Capture and log one report.
    pub fn tick(&self) -> Report {
        let state = State::capture(&self.registry, &self.metrics);
        let report = state.report();
        info!(
            open = report.open,
            avg_conn_creation_ms = %OrNa(report.avg_acquire_ms),
            creation_rate = %OrNa(report.creation_rate.map(|r| format!("{:.2}", r))),
            failures = report.failures,
            "pool stats"
        );
        report
    }

    /// Report every period until shutdown. The first report comes one period
    /// after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.period;
        let mut ticker = tokio::time::interval_at(start, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }
}
