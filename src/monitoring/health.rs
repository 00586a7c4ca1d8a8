//! Health Checks
//!
//! Periodic probing of registered dependencies and status aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::duration_serde;
use crate::domain::{HealthProbe, ProbeOutcome};
use crate::error::{Error, Result};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Dependency is healthy
    Healthy,
    /// Dependency is slow or reports reduced capability
    Degraded,
    /// Dependency failed its probe
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    /// Worst status of the set, `Healthy` when empty
    pub fn aggregate(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Latest probe result of one dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Probe latency, `-1` when the probe failed
    pub latency_ms: i64,
    pub last_check: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn healthy(name: impl Into<String>, latency: Duration) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: latency.as_millis() as i64,
            last_check: Utc::now(),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, latency: Duration, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: latency.as_millis() as i64,
            last_check: Utc::now(),
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: -1,
            last_check: Utc::now(),
            message: Some(message.into()),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthReport {
    pub fn new(checks: Vec<HealthCheck>, uptime: Duration) -> Self {
        Self {
            status: HealthStatus::aggregate(checks.iter().map(|c| c.status)),
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Health checker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckerConfig {
    #[serde(with = "duration_serde")]
    pub check_interval: Duration,
    /// Probes still pending after this are unhealthy
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,
    /// Default latency above which a dependency is degraded
    #[serde(with = "duration_serde")]
    pub degraded_latency: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            degraded_latency: Duration::from_secs(1),
        }
    }
}

struct Dependency {
    probe: Arc<dyn HealthProbe>,
    degraded_latency: Duration,
}

// =============================================================================
// Health Checker
// =============================================================================

/// Probes named dependencies and keeps their latest results
pub struct HealthChecker {
    config: HealthCheckerConfig,
    dependencies: RwLock<BTreeMap<String, Arc<Dependency>>>,
    results: RwLock<BTreeMap<String, HealthCheck>>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self {
            config,
            dependencies: RwLock::new(BTreeMap::new()),
            results: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &HealthCheckerConfig {
        &self.config
    }

    /// Register a dependency using the default degraded latency
    pub fn register(&self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) -> Result<()> {
        let latency = self.config.degraded_latency;
        self.register_with_threshold(name, probe, latency)
    }

    /// Register a dependency with its own degraded latency
    pub fn register_with_threshold(
        &self,
        name: impl Into<String>,
        probe: Arc<dyn HealthProbe>,
        degraded_latency: Duration,
    ) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Validation("dependency name must not be empty".into()));
        }

        let mut deps = self.dependencies.write();
        if deps.contains_key(&name) {
            return Err(Error::Validation(format!(
                "dependency already registered: {}",
                name
            )));
        }
        deps.insert(
            name.clone(),
            Arc::new(Dependency {
                probe,
                degraded_latency,
            }),
        );
        info!(dependency = %name, "Health dependency registered");
        Ok(())
    }

    /// Remove a dependency and its last result
    pub fn unregister(&self, name: &str) -> Result<()> {
        if self.dependencies.write().remove(name).is_none() {
            return Err(Error::NotFound {
                kind: "Dependency",
                id: name.to_string(),
            });
        }
        self.results.write().remove(name);
        Ok(())
    }

    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.read().keys().cloned().collect()
    }

    /// Probe every dependency concurrently and store the results
    pub async fn check_all(&self) -> Vec<HealthCheck> {
        let deps: Vec<(String, Arc<Dependency>)> = self
            .dependencies
            .read()
            .iter()
            .map(|(name, dep)| (name.clone(), Arc::clone(dep)))
            .collect();

        let checks = join_all(
            deps.into_iter()
                .map(|(name, dep)| self.check_one(name, dep)),
        )
        .await;

        let mut results = self.results.write();
        for check in &checks {
            results.insert(check.name.clone(), check.clone());
        }
        checks
    }

    async fn check_one(&self, name: String, dep: Arc<Dependency>) -> HealthCheck {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout, dep.probe.probe()).await;
        let latency = started.elapsed();

        let check = match outcome {
            Err(_) => HealthCheck::unhealthy(
                &name,
                format!("probe timed out after {:?}", self.config.probe_timeout),
            ),
            Ok(Err(e)) => HealthCheck::unhealthy(&name, e.to_string()),
            Ok(Ok(ProbeOutcome::Degraded(reason))) => HealthCheck::degraded(&name, latency, reason),
            Ok(Ok(ProbeOutcome::Up)) if latency > dep.degraded_latency => HealthCheck::degraded(
                &name,
                latency,
                format!("latency {}ms above {}ms", latency.as_millis(), dep.degraded_latency.as_millis()),
            ),
            Ok(Ok(ProbeOutcome::Up)) => HealthCheck::healthy(&name, latency),
        };

        match check.status {
            HealthStatus::Healthy => debug!(dependency = %name, latency_ms = check.latency_ms, "Dependency healthy"),
            _ => warn!(
                dependency = %name,
                status = %check.status,
                message = check.message.as_deref().unwrap_or(""),
                "Dependency not healthy"
            ),
        }
        check
    }

    /// Latest results keyed by dependency name
    pub fn results(&self) -> BTreeMap<String, HealthCheck> {
        self.results.read().clone()
    }

    pub fn result(&self, name: &str) -> Option<HealthCheck> {
        self.results.read().get(name).cloned()
    }

    /// Worst status over the latest results
    pub fn overall_status(&self) -> HealthStatus {
        HealthStatus::aggregate(self.results.read().values().map(|c| c.status))
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn report(&self) -> HealthReport {
        HealthReport::new(self.results.read().values().cloned().collect(), self.uptime())
    }

    /// Probe on every `check_interval` tick until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            dependencies = self.dependencies.read().len(),
            "Health checker started"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }

        info!("Health checker stopped");
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthCheckerConfig::default())
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("dependencies", &self.dependencies.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    struct StaticProbe {
        delay: Duration,
        outcome: fn() -> Result<ProbeOutcome>,
    }

    #[async_trait]
    impl HealthProbe for StaticProbe {
        async fn probe(&self) -> Result<ProbeOutcome> {
            tokio::time::sleep(self.delay).await;
            (self.outcome)()
        }
    }

    fn probe(delay_ms: u64, outcome: fn() -> Result<ProbeOutcome>) -> Arc<dyn HealthProbe> {
        Arc::new(StaticProbe {
            delay: Duration::from_millis(delay_ms),
            outcome,
        })
    }

    fn up() -> Result<ProbeOutcome> {
        Ok(ProbeOutcome::Up)
    }

    fn failing() -> Result<ProbeOutcome> {
        Err(Error::Internal("connection refused".into()))
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert_eq!(format!("{}", HealthStatus::Degraded), "degraded");
    }

    #[test]
    fn test_aggregate() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::aggregate(Vec::<HealthStatus>::new()), Healthy);
        assert_eq!(HealthStatus::aggregate([Healthy, Degraded]), Degraded);
        assert_eq!(HealthStatus::aggregate([Degraded, Unhealthy, Healthy]), Unhealthy);
    }

    #[test]
    fn test_serialization() {
        let check = HealthCheck::unhealthy("db", "down");
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["latency_ms"], -1);
    }

    #[test]
    fn test_duplicate_registration() {
        let checker = HealthChecker::default();
        checker.register("db", probe(0, up)).unwrap();
        assert_matches!(checker.register("db", probe(0, up)), Err(Error::Validation(_)));
        assert_matches!(checker.unregister("cache"), Err(Error::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_all_classifies() {
        let checker = HealthChecker::new(HealthCheckerConfig {
            probe_timeout: Duration::from_secs(2),
            degraded_latency: Duration::from_millis(500),
            ..Default::default()
        });
        checker.register("fast", probe(10, up)).unwrap();
        checker.register("slow", probe(800, up)).unwrap();
        checker.register("broken", probe(0, failing)).unwrap();
        checker.register("hung", probe(10_000, up)).unwrap();
        checker
            .register("partial", probe(0, || Ok(ProbeOutcome::Degraded("replica lag".into()))))
            .unwrap();

        let checks = checker.check_all().await;
        assert_eq!(checks.len(), 5);

        let results = checker.results();
        assert_eq!(results["fast"].status, HealthStatus::Healthy);
        assert!((10..500).contains(&results["fast"].latency_ms));
        assert_eq!(results["slow"].status, HealthStatus::Degraded);
        assert_eq!(results["broken"].status, HealthStatus::Unhealthy);
        assert_eq!(results["broken"].latency_ms, -1);
        assert_eq!(results["hung"].status, HealthStatus::Unhealthy);
        assert_eq!(results["hung"].latency_ms, -1);
        assert_eq!(results["partial"].message.as_deref(), Some("replica lag"));

        assert_eq!(checker.overall_status(), HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_dependency_threshold() {
        let checker = HealthChecker::default();
        checker
            .register_with_threshold("strict", probe(100, up), Duration::from_millis(50))
            .unwrap();
        checker.register("lenient", probe(100, up)).unwrap();

        checker.check_all().await;
        assert_eq!(checker.result("strict").unwrap().status, HealthStatus::Degraded);
        assert_eq!(checker.result("lenient").unwrap().status, HealthStatus::Healthy);
        assert_eq!(checker.overall_status(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_no_dependencies_is_healthy() {
        let checker = HealthChecker::default();
        assert!(checker.check_all().await.is_empty());
        assert_eq!(checker.overall_status(), HealthStatus::Healthy);

        let report = checker.report();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.checks.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_drops_result() {
        let checker = HealthChecker::default();
        checker.register("db", probe(0, failing)).unwrap();
        checker.check_all().await;
        assert_eq!(checker.overall_status(), HealthStatus::Unhealthy);

        checker.unregister("db").unwrap();
        assert!(checker.result("db").is_none());
        assert_eq!(checker.overall_status(), HealthStatus::Healthy);
    }
}
