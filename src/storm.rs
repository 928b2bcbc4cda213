use crate::connector::{Connector, ConnectorConfig, WorkerExit};
use crate::error::{ConfigError, Error, Result};
use crate::governor::{GovernorKind, Rate};
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::reporter::StatsReporter;
use crate::state::State;
use crate::Manager;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Resolves once shutdown is signalled. A dropped sender never signals.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Clone)]
pub struct StormConfig {
    /// Registry ceiling, at least 1
    pub max_conns: u64,
    pub rate: Rate,
    pub governor: GovernorKind,
    /// Concurrent connector tasks sharing one governor, at least 1
    pub workers: usize,
    /// Period of the stats line, must be non-zero
    pub stats_interval: Duration,
    /// Period of the heartbeat logged while holding a saturated registry
    pub hold_interval: Duration,
    pub connector: ConnectorConfig,
}

impl StormConfig {
    pub fn new(max_conns: u64, rate: Rate) -> Self {
        Self {
            max_conns,
            rate,
            governor: GovernorKind::default(),
            workers: 1,
            stats_interval: Duration::from_secs(5),
            hold_interval: Duration::from_secs(10),
            connector: ConnectorConfig::default(),
        }
    }

    /// Reject values that would leave the run without workers or make a
    /// ticker panic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str| ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        };
        if self.max_conns == 0 {
            return Err(invalid("max_conns"));
        }
        if self.workers == 0 {
            return Err(invalid("workers"));
        }
        if self.stats_interval.is_zero() {
            return Err(invalid("stats_interval"));
        }
        if self.hold_interval.is_zero() {
            return Err(invalid("hold_interval"));
        }
        Ok(())
    }
}

/// Outcome of a run that ended by shutdown
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// State captured just before the held connections were released
    pub state: State,
    /// Connections closed cleanly at shutdown
    pub closed: usize,
    /// Every worker stopped because the registry was full
    pub saturated: bool,
}

/// Opens connections through a [`Manager`] at a governed rate and holds them.
pub struct Storm<M: Manager> {
    manager: Arc<M>,
    config: StormConfig,
    registry: Arc<Registry<M::Connection>>,
    metrics: Arc<Metrics>,
}

impl<M: Manager> Debug for Storm<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.state(), f)
    }
}

impl<M: Manager> Clone for Storm<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: Manager> Storm<M> {
    pub fn new(manager: M, config: StormConfig) -> Self {
        Self {
            manager: Arc::new(manager),
            registry: Arc::new(Registry::new(config.max_conns)),
            metrics: Arc::new(Metrics::new()),
            config,
        }
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    pub fn config(&self) -> &StormConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry<M::Connection>> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn state(&self) -> State {
        State::capture(&self.registry, &self.metrics)
    }

    /// Open one connection and check it. The connection is not kept.
    pub async fn health_check(&self) -> Result<()> {
        let connect = self.manager.connect();
        let connected = match self.config.connector.acquire_timeout {
            None => connect.await,
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| Error::Startup(format!("connect timed out after {:?}", limit)))?,
        };
        let mut conn = connected.map_err(|e| Error::Startup(e.to_string()))?;
        let checked = self.manager.check(&mut conn).await;
        if let Err(e) = self.manager.close(conn).await {
            warn!(error = %e, "failed to close health check connection");
        }
        checked.map_err(|e| Error::Startup(format!("health check failed: {}", e)))?;
        info!("database reachable");
        Ok(())
    }

    /// Health check, then acquire and hold connections until `shutdown`
    /// carries `true`. Held connections are closed before returning.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        self.config.validate()?;
        self.health_check().await?;

        info!(
            max_conns = self.config.max_conns,
            rate = self.config.rate.per_second(),
            governor = %self.config.governor,
            overflow = %self.config.connector.overflow,
            workers = self.config.workers,
            "Creating {} connections at a rate of {} per second",
            self.config.max_conns,
            self.config.rate.per_second()
        );

        let reporter = StatsReporter::new(
            self.registry.clone(),
            self.metrics.clone(),
            self.config.stats_interval,
        );
        let reporter = tokio::spawn(reporter.run(shutdown.clone()));

        let governor = self.config.governor.build(self.config.rate);
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let connector = Connector::new(
                id,
                self.manager.clone(),
                self.registry.clone(),
                self.metrics.clone(),
                governor.clone(),
                self.config.connector.clone(),
            );
            workers.spawn(connector.run(shutdown.clone()));
        }

        let mut saturated = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(WorkerExit::Saturated) => saturated += 1,
                Ok(WorkerExit::Shutdown) => {}
                Err(e) => error!(error = %e, "connector task failed"),
            }
        }
        let saturated = saturated == self.config.workers;

        let mut shutdown = shutdown;
        let stopping = *shutdown.borrow();
        if !stopping {
            self.hold(&mut shutdown).await;
        }

        if let Err(e) = reporter.await {
            error!(error = %e, "stats reporter task failed");
        }
        let state = self.state();
        let closed = self.close_all().await;
        Ok(RunSummary {
            state,
            closed,
            saturated,
        })
    }

    /// Keep the registry alive, logging a heartbeat, until shutdown.
    async fn hold(&self, shutdown: &mut watch::Receiver<bool>) {
        info!(open = self.registry.len(), "Holding onto the conns");
        let period = self.config.hold_interval;
        let start = tokio::time::Instant::now() + period;
        let mut heartbeat = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => break,
                _ = heartbeat.tick() => {
                    info!(open = self.registry.len(), "Holding onto the conns");
                }
            }
        }
    }

    /// Drain the registry and close every connection; returns how many closed
    /// without error.
    pub async fn close_all(&self) -> usize {
        let conns = self.registry.drain();
        let total = conns.len();
        let mut closed = 0;
        for conn in conns {
            match self.manager.close(conn).await {
                Ok(()) => closed += 1,
                Err(e) => warn!(error = %e, "failed to close connection"),
            }
        }
        info!(closed, total, "released held connections");
        closed
    }
}
