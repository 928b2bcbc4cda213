use thiserror::Error;

/// Invalid or missing configuration, detected before any connection is opened.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid connection url: {0}")]
    Url(#[source] mysql_async::UrlError),
}

/// Errors surfaced by the load generator and its database managers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database unreachable at startup: {0}")]
    Startup(String),

    #[error("mysql: {0}")]
    MySql(#[from] mysql_async::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
