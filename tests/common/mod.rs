#![allow(dead_code)]

use async_trait::async_trait;
use connstorm::{Manager, Storm};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// In-memory manager. Connect calls are numbered from 1, the startup health check
/// included.
#[derive(Debug, Default)]
pub struct TestManager {
    pub connects: AtomicU64,
    pub closed: AtomicU64,
    /// connect calls that fail
    pub fail_attempts: Vec<u64>,
    /// every connect call from this one on fails
    pub fail_from: Option<u64>,
    /// every connect call from this one on takes `latency`
    pub slow_from: Option<u64>,
    pub latency: Duration,
    /// every check call fails
    pub fail_check: bool,
}

impl TestManager {
    pub fn unreachable() -> Self {
        Self {
            fail_from: Some(1),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct TestConnection {
    pub id: u64,
}

#[async_trait]
impl Manager for TestManager {
    type Connection = TestConnection;
    type Error = String;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.slow_from.is_some_and(|from| n >= from) {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_attempts.contains(&n) || self.fail_from.is_some_and(|from| n >= from) {
            return Err(format!("connection refused (attempt {})", n));
        }
        Ok(TestConnection { id: n })
    }

    async fn check(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if self.fail_check {
            return Err("ping failed".to_string());
        }
        Ok(())
    }

    async fn close(&self, _conn: Self::Connection) -> Result<(), Self::Error> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll until the registry holds `n` connections; false on timeout.
pub async fn wait_for_len<M: Manager>(storm: &Storm<M>, n: usize, limit: Duration) -> bool {
    tokio::time::timeout(limit, async {
        while storm.registry().len() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .is_ok()
}
