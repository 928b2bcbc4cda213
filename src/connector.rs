use crate::governor::RateGovernor;
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::storm::shutdown_requested;
use crate::Manager;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a worker does once the registry is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Claim a slot before every attempt and stop when none is left
    #[default]
    Stop,
    /// Acquire first; discard the connection and stop if it does not fit
    Drop,
}

impl Display for OverflowPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Stop => f.write_str("stop"),
            OverflowPolicy::Drop => f.write_str("drop"),
        }
    }
}

/// Exponential delay after consecutive failed attempts
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Backoff {
    /// Delay after the `consecutive`-th failure in a row (1-based).
    pub fn delay(&self, consecutive: u32) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub overflow: OverflowPolicy,
    /// None waits on a connect call for as long as it takes
    pub acquire_timeout: Option<Duration>,
    /// None retries at the governor's cadence only
    pub backoff: Option<Backoff>,
    /// Sleep after a declined permit, so a best-effort governor is not spun on
    pub poll_interval: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            overflow: OverflowPolicy::default(),
            acquire_timeout: None,
            backoff: None,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Why a worker returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Saturated,
    Shutdown,
}

/// One acquisition worker: waits for the governor, opens a connection and
/// appends it to the shared registry until the registry is full.
pub struct Connector<M: Manager> {
    id: usize,
    manager: Arc<M>,
    registry: Arc<Registry<M::Connection>>,
    metrics: Arc<Metrics>,
    governor: Arc<dyn RateGovernor>,
    config: ConnectorConfig,
    holds_slot: bool,
    consecutive_failures: u32,
}

impl<M: Manager> Debug for Connector<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("governor", &self.governor)
            .finish()
    }
}

impl<M: Manager> Connector<M> {
    pub fn new(
        id: usize,
        manager: Arc<M>,
        registry: Arc<Registry<M::Connection>>,
        metrics: Arc<Metrics>,
        governor: Arc<dyn RateGovernor>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            id,
            manager,
            registry,
            metrics,
            governor,
            config,
            holds_slot: false,
            consecutive_failures: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run until the registry is saturated or shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerExit {
        debug!(worker = self.id, overflow = %self.config.overflow, "connector started");
        let exit = loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break WorkerExit::Shutdown;
            }
            if self.config.overflow == OverflowPolicy::Stop && !self.holds_slot {
                if !self.registry.try_reserve() {
                    info!(
                        worker = self.id,
                        max_conns = self.registry.max_conns(),
                        "Reached max number of connections, stopping..."
                    );
                    break WorkerExit::Saturated;
                }
                self.holds_slot = true;
            }

            let permitted = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break WorkerExit::Shutdown,
                permitted = self.governor.permit() => permitted,
            };
            if !permitted {
                if self.pause(self.config.poll_interval, &mut shutdown).await {
                    break WorkerExit::Shutdown;
                }
                continue;
            }

            let acquired = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break WorkerExit::Shutdown,
                acquired = self.acquire() => acquired,
            };
            match acquired {
                Some(conn) => {
                    self.consecutive_failures = 0;
                    if let Some(exit) = self.store(conn).await {
                        break exit;
                    }
                }
                None => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    if let Some(backoff) = &self.config.backoff {
                        let delay = backoff.delay(self.consecutive_failures);
                        debug!(
                            worker = self.id,
                            ?delay,
                            failures = self.consecutive_failures,
                            "backing off"
                        );
                        if self.pause(delay, &mut shutdown).await {
                            break WorkerExit::Shutdown;
                        }
                    }
                }
            }
        };
        if self.holds_slot {
            self.registry.release_reservation();
            self.holds_slot = false;
        }
        debug!(worker = self.id, ?exit, "connector stopped");
        exit
    }

    /// One connect call, timed and bounded by the optional timeout.
    /// Failures are logged and counted here.
    async fn acquire(&self) -> Option<M::Connection> {
        let start = Instant::now();
        let connect = self.manager.connect();
        let result = match self.config.acquire_timeout {
            None => connect.await,
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.record_timeout();
                    warn!(worker = self.id, timeout = ?limit, "connection acquisition timed out");
                    return None;
                }
            },
        };
        match result {
            Ok(conn) => {
                self.metrics.record_acquired(start.elapsed());
                Some(conn)
            }
            Err(e) => {
                self.metrics.record_failure();
                warn!(worker = self.id, error = %e, "Failed to get connection");
                None
            }
        }
    }

    /// Append to the registry. Returns an exit when the worker must stop.
    async fn store(&mut self, conn: M::Connection) -> Option<WorkerExit> {
        match self.registry.push(conn) {
            Ok(len) => {
                self.holds_slot = false;
                debug!(worker = self.id, open = len, "connection registered");
                None
            }
            Err(conn) => {
                self.metrics.record_dropped();
                info!(
                    worker = self.id,
                    max_conns = self.registry.max_conns(),
                    "Reached max number of connections, stopping..."
                );
                if let Err(e) = self.manager.close(conn).await {
                    warn!(worker = self.id, error = %e, "failed to close surplus connection");
                }
                Some(WorkerExit::Saturated)
            }
        }
    }

    /// Sleep for `d`; true if shutdown was signalled meanwhile.
    async fn pause(&self, d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => true,
            _ = tokio::time::sleep(d) => false,
        }
    }
}
