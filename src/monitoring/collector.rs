//! Metrics Collector
//!
//! Periodic snapshots of host, application and database metrics kept in a
//! bounded in-memory history.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::duration_serde;
use crate::domain::{ApplicationMetricsSource, DatabaseSampler, SystemSampler};
use crate::error::Result;

use super::snapshot::SystemMetricsSnapshot;

/// Collector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Time between snapshots
    #[serde(with = "duration_serde")]
    pub collection_interval: Duration,
    /// Snapshots kept before the oldest is evicted
    pub max_history: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(60),
            max_history: 1000,
        }
    }
}

/// Summary of the history buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub snapshots: usize,
    pub capacity: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Metrics collector
pub struct MetricsCollector {
    config: CollectorConfig,
    system: Arc<dyn SystemSampler>,
    application: Option<Arc<dyn ApplicationMetricsSource>>,
    database: Option<Arc<dyn DatabaseSampler>>,
    history: RwLock<VecDeque<SystemMetricsSnapshot>>,
}

impl MetricsCollector {
    /// Create a collector sampling the host through `system`
    pub fn new(config: CollectorConfig, system: Arc<dyn SystemSampler>) -> Self {
        let capacity = config.max_history.max(1);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            config,
            system,
            application: None,
            database: None,
        }
    }

    /// Attach the source of application aggregates
    pub fn with_application(mut self, source: Arc<dyn ApplicationMetricsSource>) -> Self {
        self.application = Some(source);
        self
    }

    /// Attach a database sampler
    pub fn with_database(mut self, sampler: Arc<dyn DatabaseSampler>) -> Self {
        self.database = Some(sampler);
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Build one snapshot without recording it.
    ///
    /// A failing database sampler leaves the database group empty; a failing
    /// system sampler fails the whole snapshot.
    pub async fn collect(&self) -> Result<SystemMetricsSnapshot> {
        let system = self.system.sample()?;
        let mut snapshot = SystemMetricsSnapshot::new(system);

        if let Some(source) = &self.application {
            snapshot.application = Some(source.application_metrics());
        }

        if let Some(sampler) = &self.database {
            match sampler.sample().await {
                Ok(db) => snapshot.database = Some(db),
                Err(e) => warn!(error = %e, "Database metrics unavailable"),
            }
        }

        Ok(snapshot)
    }

    /// Collect and record one snapshot; failures are logged and skipped
    pub async fn collect_once(&self) -> Option<SystemMetricsSnapshot> {
        match self.collect().await {
            Ok(snapshot) => {
                self.record(snapshot.clone());
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Metrics collection failed, skipping tick");
                None
            }
        }
    }

    /// Append a snapshot, evicting the oldest beyond `max_history`
    pub fn record(&self, snapshot: SystemMetricsSnapshot) {
        let cap = self.config.max_history.max(1);
        let mut history = self.history.write();
        history.push_back(snapshot);
        while history.len() > cap {
            history.pop_front();
        }
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<SystemMetricsSnapshot> {
        self.history.read().back().cloned()
    }

    /// Snapshots from the last `hours` hours, oldest first
    pub fn history(&self, hours: f64) -> Vec<SystemMetricsSnapshot> {
        self.history_at(hours, Utc::now())
    }

    /// Snapshots with `timestamp > now - hours`
    pub fn history_at(&self, hours: f64, now: DateTime<Utc>) -> Vec<SystemMetricsSnapshot> {
        let window_ms = (hours.max(0.0) * 3_600_000.0) as i64;
        // A window reaching past the representable range covers everything
        let cutoff = chrono::Duration::try_milliseconds(window_ms)
            .and_then(|window| now.checked_sub_signed(window));
        self.history
            .read()
            .iter()
            .filter(|s| cutoff.map_or(true, |cutoff| s.timestamp > cutoff))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    pub fn stats(&self) -> CollectorStats {
        let history = self.history.read();
        CollectorStats {
            snapshots: history.len(),
            capacity: self.config.max_history,
            oldest: history.front().map(|s| s.timestamp),
            newest: history.back().map(|s| s.timestamp),
        }
    }

    /// Collect on every `collection_interval` tick until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.collection_interval.as_millis() as u64,
            max_history = self.config.max_history,
            "Metrics collector started"
        );

        let mut ticker = tokio::time::interval(self.config.collection_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(snapshot) = self.collect_once().await {
                        debug!(
                            cpu = snapshot.system.cpu.usage,
                            memory = snapshot.system.memory.usage,
                            "Metrics collected"
                        );
                    }
                }
            }
        }

        info!("Metrics collector stopped");
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("snapshots", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::monitoring::snapshot::{
        ApplicationMetrics, CpuMetrics, DatabaseMetrics, SystemMetrics,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct FixedSampler {
        calls: AtomicU32,
        fail: AtomicBool,
    }

    impl SystemSampler for FixedSampler {
        fn sample(&self) -> Result<SystemMetrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Sampling("sensor offline".into()));
            }
            Ok(SystemMetrics {
                cpu: CpuMetrics {
                    usage: 12.0,
                    load_average: 0.5,
                    cores: 4,
                },
                ..Default::default()
            })
        }
    }

    struct FixedApp;

    impl ApplicationMetricsSource for FixedApp {
        fn application_metrics(&self) -> ApplicationMetrics {
            ApplicationMetrics {
                registered_services: 3,
                ..Default::default()
            }
        }
    }

    struct BrokenDb;

    #[async_trait]
    impl DatabaseSampler for BrokenDb {
        async fn sample(&self) -> Result<DatabaseMetrics> {
            Err(Error::Sampling("no connection".into()))
        }
    }

    fn snapshot_at(ts: DateTime<Utc>) -> SystemMetricsSnapshot {
        SystemMetricsSnapshot::at(ts, SystemMetrics::default())
    }

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();
        assert_eq!(config.collection_interval, Duration::from_secs(60));
        assert_eq!(config.max_history, 1000);
    }

    #[tokio::test]
    async fn test_collect_includes_groups() {
        let collector = MetricsCollector::new(CollectorConfig::default(), Arc::new(FixedSampler::default()))
            .with_application(Arc::new(FixedApp))
            .with_database(Arc::new(BrokenDb));

        let snapshot = collector.collect_once().await.unwrap();
        assert_eq!(snapshot.system.cpu.cores, 4);
        assert_eq!(snapshot.application.unwrap().registered_services, 3);
        // Database failure only drops its own group
        assert!(snapshot.database.is_none());
        assert_eq!(collector.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sample_skips_tick() {
        let sampler = Arc::new(FixedSampler::default());
        sampler.fail.store(true, Ordering::SeqCst);
        let collector = MetricsCollector::new(CollectorConfig::default(), sampler);

        assert!(collector.collect_once().await.is_none());
        assert!(collector.is_empty());
        assert!(collector.latest().is_none());
    }

    #[test]
    fn test_history_capped() {
        let config = CollectorConfig {
            max_history: 5,
            ..Default::default()
        };
        let collector = MetricsCollector::new(config, Arc::new(FixedSampler::default()));
        let base = Utc::now();

        for i in 0..12 {
            collector.record(snapshot_at(base + chrono::Duration::seconds(i)));
        }

        let stats = collector.stats();
        assert_eq!(stats.snapshots, 5);
        assert_eq!(stats.oldest, Some(base + chrono::Duration::seconds(7)));
        assert_eq!(stats.newest, Some(base + chrono::Duration::seconds(11)));
        assert_eq!(
            collector.latest().unwrap().timestamp,
            base + chrono::Duration::seconds(11)
        );
    }

    #[test]
    fn test_history_window() {
        let collector = MetricsCollector::new(CollectorConfig::default(), Arc::new(FixedSampler::default()));
        let now = Utc::now();

        collector.record(snapshot_at(now - chrono::Duration::hours(5)));
        collector.record(snapshot_at(now - chrono::Duration::hours(2)));
        collector.record(snapshot_at(now - chrono::Duration::minutes(30)));
        collector.record(snapshot_at(now));

        assert_eq!(collector.history_at(1.0, now).len(), 2);
        assert_eq!(collector.history_at(3.0, now).len(), 3);
        assert_eq!(collector.history_at(24.0, now).len(), 4);
        // Exactly on the boundary is excluded
        assert_eq!(collector.history_at(2.0, now).len(), 2);
        assert!(collector.history_at(0.0, now).is_empty());
    }

    #[test]
    fn test_unbounded_window_returns_everything() {
        let collector = MetricsCollector::new(CollectorConfig::default(), Arc::new(FixedSampler::default()));
        let now = Utc::now();
        collector.record(snapshot_at(now - chrono::Duration::days(400)));
        collector.record(snapshot_at(now));

        assert_eq!(collector.history(f64::INFINITY).len(), 2);
        assert_eq!(collector.history_at(1e10, now).len(), 2);
        assert_eq!(collector.history_at(f64::MAX, now).len(), 2);
        assert_eq!(collector.history_at(1e6, now).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let sampler = Arc::new(FixedSampler::default());
        let config = CollectorConfig {
            collection_interval: Duration::from_secs(10),
            ..Default::default()
        };
        let collector = Arc::new(MetricsCollector::new(config, sampler.clone()));
        let token = CancellationToken::new();
        let handle = tokio::spawn(collector.clone().run(token.clone()));

        // First tick fires immediately, then at 10s and 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(sampler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(collector.len(), 3);
    }
}
