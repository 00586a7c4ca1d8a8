//! Overwatch Context
//!
//! The handle owning the registry and the monitoring components. Build it
//! once at startup, pass it by reference, and drive its background tasks
//! with [`Overwatch::start`] and [`Overwatch::shutdown`].
//!
//! ```ignore
//! let overwatch = Overwatch::builder(config).build()?;
//! overwatch.install().await?;
//! overwatch.start();
//!
//! let id = overwatch.registry().register(ServiceConfig::new("echo"), |v| async move { Ok(v) }).await?;
//! overwatch.registry().execute(&id, json!({})).await?;
//!
//! overwatch.shutdown().await;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{
    http_service_handler, probe_from_config, LoggingEventPublisher, LoggingNotifier,
    SysinfoSampler,
};
use crate::config::OverwatchConfig;
use crate::domain::{DatabaseSampler, EventPublisher, Notifier, SystemSampler};
use crate::error::{Error, Result};
use crate::monitoring::{
    AlertEngine, AlertPatch, AlertRule, HealthCheck, HealthChecker, HealthStatus, MetricAlert,
    MetricsCollector, SystemMetricsSnapshot,
};
use crate::resilience::{ServiceRegistry, ServiceStatus};

/// Point-in-time view of the whole system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Worst of dependency health, degraded while any circuit is open
    pub overall: HealthStatus,
    pub services: BTreeMap<String, ServiceStatus>,
    pub health_checks: BTreeMap<String, HealthCheck>,
    pub latest_metrics: Option<SystemMetricsSnapshot>,
    pub active_alerts: Vec<MetricAlert>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Builder
// =============================================================================

/// Wires the ports an [`Overwatch`] depends on. Unset ports get the
/// logging / sysinfo defaults.
pub struct OverwatchBuilder {
    config: OverwatchConfig,
    publisher: Option<Arc<dyn EventPublisher>>,
    notifier: Option<Arc<dyn Notifier>>,
    sampler: Option<Arc<dyn SystemSampler>>,
    database: Option<Arc<dyn DatabaseSampler>>,
    http_client: Option<reqwest::Client>,
}

impl OverwatchBuilder {
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn system_sampler(mut self, sampler: Arc<dyn SystemSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn database_sampler(mut self, sampler: Arc<dyn DatabaseSampler>) -> Self {
        self.database = Some(sampler);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Result<Overwatch> {
        self.config.validate()?;

        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(LoggingEventPublisher::info_level()));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LoggingNotifier::new()));
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(SysinfoSampler::new()));

        let registry = Arc::new(ServiceRegistry::new(publisher.clone()));

        let mut collector = MetricsCollector::new(self.config.collector.clone(), sampler)
            .with_application(registry.clone());
        if let Some(db) = self.database {
            collector = collector.with_database(db);
        }

        let health = HealthChecker::new(self.config.health.clone());
        let alerts =
            AlertEngine::new(self.config.alerts.clone(), notifier).with_publisher(publisher);

        Ok(Overwatch {
            http: self.http_client.unwrap_or_default(),
            config: self.config,
            registry,
            collector: Arc::new(collector),
            health: Arc::new(health),
            alerts: Arc::new(alerts),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

// =============================================================================
// Overwatch
// =============================================================================

pub struct Overwatch {
    config: OverwatchConfig,
    registry: Arc<ServiceRegistry>,
    collector: Arc<MetricsCollector>,
    health: Arc<HealthChecker>,
    alerts: Arc<AlertEngine>,
    http: reqwest::Client,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Overwatch {
    pub fn builder(config: OverwatchConfig) -> OverwatchBuilder {
        OverwatchBuilder {
            config,
            publisher: None,
            notifier: None,
            sampler: None,
            database: None,
            http_client: None,
        }
    }

    /// Context with default ports and configuration
    pub fn with_defaults() -> Result<Self> {
        Self::builder(OverwatchConfig::default()).build()
    }

    /// Register the dependencies, rules and external services declared in
    /// the configuration. The whole batch is checked first; nothing is
    /// registered when any entry would be refused.
    pub async fn install(&self) -> Result<()> {
        self.check_install()?;

        for dep in &self.config.dependencies {
            let probe = probe_from_config(&self.http, dep);
            let threshold = dep
                .degraded_latency
                .unwrap_or(self.config.health.degraded_latency);
            self.health
                .register_with_threshold(dep.name.clone(), probe, threshold)?;
        }

        for rule in &self.config.rules {
            self.alerts.create(rule.clone())?;
        }

        for service in &self.config.services {
            let endpoint = service.endpoint.clone().ok_or_else(|| {
                Error::Config(format!("configured service '{}' needs an endpoint", service.name))
            })?;
            let handler = http_service_handler(self.http.clone(), endpoint);
            self.registry
                .register_handler(service.clone(), handler)
                .await?;
        }

        info!(
            dependencies = self.config.dependencies.len(),
            rules = self.config.rules.len(),
            services = self.config.services.len(),
            "Configuration installed"
        );
        Ok(())
    }

    fn check_install(&self) -> Result<()> {
        self.config.validate()?;

        let registered = self.health.dependency_names();
        for dep in &self.config.dependencies {
            if dep.name.trim().is_empty() {
                return Err(Error::Validation("dependency name must not be empty".into()));
            }
            if registered.contains(&dep.name) {
                return Err(Error::Validation(format!(
                    "dependency already registered: {}",
                    dep.name
                )));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.config.rules {
            rule.validate()?;
            if let Some(id) = &rule.id {
                if self.alerts.contains(id) || !rule_ids.insert(id.as_str()) {
                    return Err(Error::Validation(format!("alert id already exists: {}", id)));
                }
            }
        }

        let mut service_ids = HashSet::new();
        for service in &self.config.services {
            service.validate()?;
            if let Some(id) = &service.id {
                if self.registry.contains(id) || !service_ids.insert(id.as_str()) {
                    return Err(Error::Validation(format!(
                        "service id already registered: {}",
                        id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Spawn the collector, health checker and alert engine tasks.
    ///
    /// Calling it again while the tasks run, or after [`Overwatch::shutdown`],
    /// has no effect.
    pub fn start(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Overwatch has been shut down and cannot be restarted");
            return;
        }
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Overwatch already started");
            return;
        }

        tasks.push(tokio::spawn(
            self.collector.clone().run(self.shutdown.child_token()),
        ));
        tasks.push(tokio::spawn(
            self.health.clone().run(self.shutdown.child_token()),
        ));
        tasks.push(tokio::spawn(self.alerts.clone().run(
            self.collector.clone(),
            self.shutdown.child_token(),
        )));
        info!("Overwatch started");
    }

    /// Stop the background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Overwatch stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.tasks.lock().is_empty()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn system_status(&self) -> SystemStatus {
        let now = Utc::now();
        let services = self.registry.report();
        let any_open = services.values().any(|s| s.is_open());
        let mut overall = self.health.overall_status();
        if any_open {
            overall = overall.max(HealthStatus::Degraded);
        }

        SystemStatus {
            overall,
            services,
            health_checks: self.health.results(),
            latest_metrics: self.collector.latest(),
            active_alerts: self.alerts.active_alerts(now),
            timestamp: now,
        }
    }

    /// Snapshots from the last `hours` hours
    pub fn metrics_history(&self, hours: f64) -> Vec<SystemMetricsSnapshot> {
        self.collector.history(hours)
    }

    // =========================================================================
    // Alert Delegation
    // =========================================================================

    pub fn create_alert(&self, rule: AlertRule) -> Result<String> {
        self.alerts.create(rule)
    }

    pub fn update_alert(&self, id: &str, patch: AlertPatch) -> Result<MetricAlert> {
        self.alerts.update(id, patch)
    }

    pub fn delete_alert(&self, id: &str) -> Result<MetricAlert> {
        self.alerts.delete(id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &OverwatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }
}

impl std::fmt::Debug for Overwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overwatch")
            .field("registry", &self.registry)
            .field("collector", &self.collector)
            .field("health", &self.health)
            .field("alerts", &self.alerts)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
