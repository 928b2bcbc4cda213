//! Command line and environment configuration.
//!
//! Every option can be given as a flag or through the environment variable
//! named next to it; an optional `.env` file is loaded by the binary first.

use crate::connector::{Backoff, ConnectorConfig, OverflowPolicy};
use crate::error::ConfigError;
use crate::governor::{GovernorKind, Rate};
use crate::logging::{LogFormat, LoggingConfig};
use crate::storm::StormConfig;
use clap::Parser;
use mysql_async::{Opts, OptsBuilder};
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Parser)]
#[command(
    name = "connstorm",
    version,
    about = "Open MySQL connections at a governed rate and hold them"
)]
pub struct Cli {
    #[arg(long, env = "MYSQL_USER")]
    pub user: Option<String>,

    #[arg(long, env = "MYSQL_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,

    #[arg(long, env = "MYSQL_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = "MYSQL_PORT", default_value_t = 3306)]
    pub port: u16,

    #[arg(long, env = "MYSQL_DATABASE")]
    pub database: Option<String>,

    /// Full mysql:// URL, replaces user/password/host/port/database
    #[arg(long, env = "MYSQL_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// Ceiling on held connections
    #[arg(long, env = "MAX_CONNS", default_value_t = 1000, allow_negative_numbers = true)]
    pub max_conns: i64,

    /// Target connections opened per second
    #[arg(long, env = "CONN_CREATION_RATE", default_value_t = 1, allow_negative_numbers = true)]
    pub rate: i64,

    /// Concurrent connector tasks sharing one rate governor
    #[arg(long, env = "WORKERS", default_value_t = 1, allow_negative_numbers = true)]
    pub workers: i64,

    #[arg(long, env = "LIMITER", value_enum, default_value_t = GovernorKind::Strict)]
    pub limiter: GovernorKind,

    #[arg(long, env = "OVERFLOW_POLICY", value_enum, default_value_t = OverflowPolicy::Stop)]
    pub overflow: OverflowPolicy,

    #[arg(long, env = "STATS_INTERVAL_SECS", default_value_t = 5)]
    pub stats_interval_secs: u64,

    /// Abandon a connect call after this many milliseconds
    #[arg(long, env = "ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: Option<u64>,

    /// Enables exponential backoff after consecutive failures
    #[arg(long, env = "BACKOFF_INITIAL_MS")]
    pub backoff_initial_ms: Option<u64>,

    #[arg(long, env = "BACKOFF_MAX_MS", default_value_t = 30_000)]
    pub backoff_max_ms: u64,

    #[arg(long, env = "BACKOFF_MULTIPLIER", default_value_t = 2.0)]
    pub backoff_multiplier: f64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Where to connect
#[derive(Clone)]
pub enum ConnectOptions {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
}

impl ConnectOptions {
    pub fn to_opts(&self) -> Result<Opts, ConfigError> {
        match self {
            ConnectOptions::Url(url) => Opts::from_url(url).map_err(ConfigError::Url),
            ConnectOptions::Parts {
                host,
                port,
                user,
                password,
                database,
            } => Ok(OptsBuilder::default()
                .ip_or_hostname(host.as_str())
                .tcp_port(*port)
                .user(Some(user.as_str()))
                .pass(Some(password.as_str()))
                .db_name(Some(database.as_str()))
                .into()),
        }
    }
}

// passwords never reach the logs
impl Display for ConnectOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectOptions::Url(url) => match url.rsplit_once('@') {
                Some((_, rest)) => write!(f, "mysql://***@{}", rest),
                None => f.write_str(url),
            },
            ConnectOptions::Parts {
                host,
                port,
                user,
                database,
                ..
            } => write!(f, "{}@{}:{}/{}", user, host, port, database),
        }
    }
}

impl Debug for ConnectOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Validated configuration for one run
#[derive(Debug, Clone)]
pub struct Settings {
    pub connect: ConnectOptions,
    pub storm: StormConfig,
    pub logging: LoggingConfig,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let connect = self.connect_options()?;

        let max_conns = positive("max_conns", self.max_conns)?;
        let workers = usize::try_from(positive("workers", self.workers)?).map_err(|_| {
            ConfigError::InvalidValue {
                field: "workers",
                reason: format!("{} is too large", self.workers),
            }
        })?;
        let rate = Rate::new(self.rate)?;

        if self.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stats_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        let acquire_timeout = match self.acquire_timeout_ms {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "acquire_timeout_ms",
                    reason: "must be greater than zero".to_string(),
                })
            }
            ms => ms.map(Duration::from_millis),
        };

        let backoff = match self.backoff_initial_ms {
            None | Some(0) => None,
            Some(initial) => {
                if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
                    return Err(ConfigError::InvalidValue {
                        field: "backoff_multiplier",
                        reason: format!("{} (must be at least 1.0)", self.backoff_multiplier),
                    });
                }
                Some(Backoff {
                    initial: Duration::from_millis(initial),
                    max: Duration::from_millis(self.backoff_max_ms.max(initial)),
                    multiplier: self.backoff_multiplier,
                })
            }
        };

        let mut storm = StormConfig::new(max_conns, rate);
        storm.governor = self.limiter;
        storm.workers = workers;
        storm.stats_interval = Duration::from_secs(self.stats_interval_secs);
        storm.connector = ConnectorConfig {
            overflow: self.overflow,
            acquire_timeout,
            backoff,
            ..ConnectorConfig::default()
        };

        Ok(Settings {
            connect,
            storm,
            logging: LoggingConfig {
                level: self.log_level,
                format: self.log_format,
            },
        })
    }

    fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        if let Some(url) = self.url.as_ref().filter(|url| !url.is_empty()) {
            // reject malformed urls at startup
            Opts::from_url(url).map_err(ConfigError::Url)?;
            return Ok(ConnectOptions::Url(url.clone()));
        }
        let user = required("user", &self.user)?;
        let database = required("database", &self.database)?;
        let host = match self.host.trim() {
            "" => DEFAULT_HOST.to_string(),
            host => host.to_string(),
        };
        Ok(ConnectOptions::Parts {
            host,
            port: self.port,
            user,
            password: self.password.clone(),
            database,
        })
    }
}

fn required(field: &'static str, value: &Option<String>) -> Result<String, ConfigError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::MissingField { field }),
    }
}

fn positive(field: &'static str, value: i64) -> Result<u64, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("{} (must be greater than zero)", value),
        });
    }
    Ok(value as u64)
}
