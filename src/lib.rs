//! Connection-creation load generator.
//!
//! Opens database connections at a governed rate up to a ceiling, holds them
//! for the lifetime of the run and periodically logs registry statistics.

mod clock;
pub mod config;
pub mod connector;
pub mod error;
pub mod governor;
pub mod logging;
pub mod metrics;
pub mod mysql;
pub mod registry;
pub mod reporter;
pub mod state;
pub mod storm;

use async_trait::async_trait;
use std::fmt::Display;

/// Manager opens, checks and closes connections to the target database
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Connection: Send + 'static;

    type Error: Display + Send + Sync + 'static;

    ///open one new connection
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
    ///check Connection is alive? used as the startup health check
    async fn check(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;
    ///close Connection cleanly, default just drops it
    async fn close(&self, conn: Self::Connection) -> Result<(), Self::Error> {
        drop(conn);
        Ok(())
    }
}

pub use connector::{Backoff, Connector, ConnectorConfig, OverflowPolicy, WorkerExit};
pub use error::{ConfigError, Error};
pub use governor::{BestEffortGovernor, GovernorKind, Rate, RateGovernor, StrictGovernor};
pub use registry::Registry;
pub use state::{Report, State};
pub use storm::{RunSummary, Storm, StormConfig};
