//! MySQL manager backed by `mysql_async`.
//!
//! Every acquisition opens a direct `Conn`; nothing is pooled, so each call
//! exercises the server's connection-acceptance path.

use crate::config::ConnectOptions;
use crate::error::{ConfigError, Error};
use crate::Manager;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};
use std::fmt::{Debug, Formatter};

pub struct MySqlManager {
    opts: Opts,
}

impl Debug for MySqlManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlManager")
            .field("host", &self.opts.ip_or_hostname())
            .field("port", &self.opts.tcp_port())
            .field("user", &self.opts.user())
            .field("database", &self.opts.db_name())
            .finish()
    }
}

impl MySqlManager {
    pub fn new(options: &ConnectOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            opts: options.to_opts()?,
        })
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }
}

#[async_trait]
impl Manager for MySqlManager {
    type Connection = Conn;
    type Error = Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Ok(Conn::new(self.opts.clone()).await?)
    }

    async fn check(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self, conn: Self::Connection) -> Result<(), Self::Error> {
        conn.disconnect().await?;
        Ok(())
    }
}
