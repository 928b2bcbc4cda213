mod common;

#[cfg(test)]
mod test {
    use crate::common::{wait_for_len, TestManager};
    use connstorm::{ConfigError, Error, GovernorKind, OverflowPolicy, Rate, Storm, StormConfig};
    use std::time::Duration;
    use tokio::sync::watch;

    fn config(max_conns: u64, rate: i64) -> StormConfig {
        StormConfig::new(max_conns, Rate::new(rate).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unthrottled_saturates_and_stabilizes() {
        let storm = Storm::new(TestManager::default(), config(10, 1000));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        assert!(wait_for_len(&storm, 10, Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(storm.registry().len(), 10);
        // health check + 10 acquisitions
        assert_eq!(storm.manager().connects(), 11);

        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert!(summary.saturated);
        assert_eq!(summary.state.open, 10);
        assert_eq!(summary.closed, 10);
        assert!(storm.registry().is_empty());
        assert_eq!(storm.manager().closed(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_saturated() {
        let storm = Storm::new(TestManager::default(), config(5, 1));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        let open = storm.registry().len();
        assert!(open <= 4, "open = {}", open);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(storm.registry().len(), 5);

        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.closed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_database_fails_before_acquiring() {
        let storm = Storm::new(TestManager::unreachable(), config(10, 1000));
        let (_tx, rx) = watch::channel(false);

        let err = storm.run(rx).await.unwrap_err();
        assert!(matches!(err, Error::Startup(_)));
        assert_eq!(storm.manager().connects(), 1);
        assert!(storm.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_health_check_aborts_startup() {
        let manager = TestManager {
            fail_check: true,
            ..TestManager::default()
        };
        let storm = Storm::new(manager, config(10, 1000));
        let (_tx, rx) = watch::channel(false);

        let err = storm.run(rx).await.unwrap_err();
        assert!(matches!(err, Error::Startup(_)));
        assert!(err.to_string().contains("health check failed: ping failed"));
        assert_eq!(storm.manager().connects(), 1);
        // the health check connection is closed even though its check failed
        assert_eq!(storm.manager().closed(), 1);
        assert!(storm.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_startup_connect_times_out() {
        let manager = TestManager {
            slow_from: Some(1),
            latency: Duration::from_secs(30),
            ..TestManager::default()
        };
        let mut config = config(10, 1000);
        config.connector.acquire_timeout = Some(Duration::from_millis(200));
        let storm = Storm::new(manager, config);
        let (_tx, rx) = watch::channel(false);
        let start = tokio::time::Instant::now();

        let err = storm.run(rx).await.unwrap_err();
        assert!(matches!(err, Error::Startup(_)));
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(storm.manager().connects(), 1);
        // the connect never returned, so there was nothing to close
        assert_eq!(storm.manager().closed(), 0);
        assert!(storm.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_rejected_before_connecting() {
        let mut zero_stats = config(10, 1000);
        zero_stats.stats_interval = Duration::ZERO;
        let mut zero_hold = config(10, 1000);
        zero_hold.hold_interval = Duration::ZERO;

        for config in [zero_stats, zero_hold] {
            let storm = Storm::new(TestManager::default(), config);
            let (_tx, rx) = watch::channel(false);
            let err = storm.run(rx).await.unwrap_err();
            assert!(matches!(err, Error::Config(ConfigError::InvalidValue { .. })));
            assert_eq!(storm.manager().connects(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_logged_and_retried() {
        let manager = TestManager {
            fail_attempts: vec![3, 7],
            ..TestManager::default()
        };
        let storm = Storm::new(manager, config(10, 1000));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        assert!(wait_for_len(&storm, 10, Duration::from_secs(5)).await);
        assert_eq!(storm.metrics().failures(), 2);
        assert_eq!(storm.manager().connects(), 13);

        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.state.failures, 2);
        assert_eq!(summary.closed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_policy_with_many_workers() {
        let mut config = config(5, 1000);
        config.workers = 3;
        config.connector.overflow = OverflowPolicy::Drop;
        let storm = Storm::new(TestManager::default(), config);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        assert!(wait_for_len(&storm, 5, Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        // every worker stops on its own surplus connection
        assert_eq!(storm.metrics().dropped(), 3);
        assert_eq!(storm.manager().connects(), 1 + 5 + 3);
        assert_eq!(storm.registry().len(), 5);

        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert!(summary.saturated);
        assert_eq!(summary.closed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_policy_with_many_workers() {
        let mut config = config(8, 1000);
        config.workers = 4;
        config.governor = GovernorKind::BestEffort;
        let storm = Storm::new(TestManager::default(), config);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        assert!(wait_for_len(&storm, 8, Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(storm.manager().connects(), 1 + 8);
        assert_eq!(storm.metrics().dropped(), 0);

        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert!(summary.saturated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_saturation_closes_everything() {
        let storm = Storm::new(TestManager::default(), config(100, 1));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();
        assert!(!summary.saturated);
        assert_eq!(summary.state.open, 3);
        assert_eq!(summary.closed, 3);
        assert!(storm.registry().is_empty());
        assert_eq!(storm.registry().claimed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_monotonic_and_bounded() {
        let mut config = config(6, 50);
        config.workers = 2;
        let storm = Storm::new(TestManager::default(), config);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let storm = storm.clone();
            async move { storm.run(rx).await }
        });

        let mut last = 0;
        for _ in 0..100 {
            let len = storm.registry().len();
            assert!(len >= last);
            assert!(len <= 6);
            last = len;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last, 6);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
