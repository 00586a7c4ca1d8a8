//! Service Registry
//!
//! Owns the mapping from service id to handler, config, breaker and
//! performance tracker, and is the single entry point for invocation.
//!
//! ```text
//! caller ──▶ execute(id) ──▶ CircuitBreaker::call ──▶ handler(args)
//!                 │                                        │
//!                 └──── PerformanceTracker ◀── outcome ────┘
//!                 └──── EventPublisher (warnings, errors, transitions)
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::duration_serde;
use crate::domain::{ApplicationMetricsSource, EventPublisher, ServiceEvent};
use crate::error::{BoxError, Error, Result};
use crate::monitoring::ApplicationMetrics;

use super::breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
use super::tracker::{PerformanceTracker, ServiceMetadata};

/// Type-erased service callable
pub type ServiceHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`ServiceHandler`]
pub fn service_fn<F, Fut>(f: F) -> ServiceHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

// =============================================================================
// Configuration
// =============================================================================

/// Where a service runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    Internal,
    External,
}

/// Registration settings of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique id; generated when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub kind: ServiceKind,

    /// Remote endpoint for external services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-call timeout enforced by the breaker
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Reserved. No retry is performed at this layer.
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub circuit_breaker: BreakerConfig,

    /// Calls slower than this publish a performance warning
    #[serde(default = "default_performance_threshold", with = "duration_serde")]
    pub performance_threshold: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_performance_threshold() -> Duration {
    Duration::from_secs(1)
}

impl ServiceConfig {
    /// Internal service with default thresholds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: ServiceKind::Internal,
            endpoint: None,
            timeout: default_timeout(),
            retries: 0,
            circuit_breaker: BreakerConfig::default(),
            performance_threshold: default_performance_threshold(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark as external, reachable at `endpoint`
    pub fn external(mut self, endpoint: impl Into<String>) -> Self {
        self.kind = ServiceKind::External;
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn with_performance_threshold(mut self, threshold: Duration) -> Self {
        self.performance_threshold = threshold;
        self
    }

    /// Check everything registration depends on
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("service name must not be empty".into()));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(Error::Validation("service id must not be blank".into()));
            }
        }
        if self.timeout.is_zero() {
            return Err(Error::Validation(format!(
                "service '{}' timeout must be > 0",
                self.name
            )));
        }
        if self.kind == ServiceKind::External && self.endpoint.is_none() {
            return Err(Error::Validation(format!(
                "external service '{}' needs an endpoint",
                self.name
            )));
        }
        self.circuit_breaker.validate()
    }
}

// =============================================================================
// Status
// =============================================================================

/// Read-only view of one registered service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: String,
    pub config: ServiceConfig,
    pub metadata: ServiceMetadata,
    pub circuit_breaker: BreakerStats,
    pub registered_at: DateTime<Utc>,
}

impl ServiceStatus {
    pub fn state(&self) -> CircuitState {
        self.circuit_breaker.state
    }

    pub fn is_open(&self) -> bool {
        self.circuit_breaker.is_open
    }
}

struct ServiceEntry {
    id: String,
    config: ServiceConfig,
    handler: ServiceHandler,
    breaker: CircuitBreaker,
    tracker: PerformanceTracker,
    registered_at: DateTime<Utc>,
}

impl ServiceEntry {
    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            id: self.id.clone(),
            config: self.config.clone(),
            metadata: self.tracker.snapshot(),
            circuit_breaker: self.breaker.stats(),
            registered_at: self.registered_at,
        }
    }
}

// =============================================================================
// Service Registry
// =============================================================================

/// Registry of breaker-guarded services
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceEntry>>,
    publisher: Arc<dyn EventPublisher>,
    start_time: Instant,
}

impl ServiceRegistry {
    /// Create an empty registry publishing to `publisher`
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            services: DashMap::new(),
            publisher,
            start_time: Instant::now(),
        }
    }

    /// Register an async closure as a service. Returns the service id.
    pub async fn register<F, Fut>(&self, config: ServiceConfig, f: F) -> Result<String>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
    {
        self.register_handler(config, service_fn(f)).await
    }

    /// Register a prepared handler. Nothing is stored when validation fails.
    #[instrument(skip(self, config, handler), fields(service = %config.name))]
    pub async fn register_handler(
        &self,
        mut config: ServiceConfig,
        handler: ServiceHandler,
    ) -> Result<String> {
        config.validate()?;

        let id = config
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let entry = ServiceEntry {
            id: id.clone(),
            breaker: CircuitBreaker::new(id.clone(), config.circuit_breaker.clone()),
            tracker: PerformanceTracker::new(),
            handler,
            registered_at: Utc::now(),
            config,
        };
        let (name, kind) = (entry.config.name.clone(), entry.config.kind);

        match self.services.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::Validation(format!(
                    "service id already registered: {}",
                    id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
            }
        }

        info!(service_id = %id, kind = ?kind, "Service registered");
        self.emit(ServiceEvent::registered(id.clone(), name, kind)).await;
        Ok(id)
    }

    /// Remove a service
    pub fn unregister(&self, id: &str) -> Result<()> {
        self.services
            .remove(id)
            .map(|_| info!(service_id = %id, "Service unregistered"))
            .ok_or_else(|| Error::service_not_found(id))
    }

    /// Invoke a service through its breaker
    #[instrument(skip(self, args), fields(service_id = %id))]
    pub async fn execute(&self, id: &str, args: Value) -> Result<Value> {
        let entry = self
            .services
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::service_not_found(id))?;

        let started = Instant::now();
        let handler = Arc::clone(&entry.handler);
        let result = entry
            .breaker
            .call(Some(entry.config.timeout), move || handler(args))
            .await;
        let elapsed = started.elapsed();

        if !matches!(result, Err(Error::CircuitOpen { .. })) {
            entry.tracker.record(elapsed, result.is_ok());
        }

        let transitions = entry.breaker.take_transitions();
        for t in transitions {
            self.emit(ServiceEvent::circuit_state_changed(&entry.id, t.from, t.to))
                .await;
        }

        if !matches!(result, Err(Error::CircuitOpen { .. }))
            && elapsed > entry.config.performance_threshold
        {
            warn!(
                service_id = %entry.id,
                duration_ms = elapsed.as_millis() as u64,
                threshold_ms = entry.config.performance_threshold.as_millis() as u64,
                "Service call exceeded performance threshold"
            );
            self.emit(ServiceEvent::performance_warning(
                &entry.id,
                elapsed.as_millis() as u64,
                entry.config.performance_threshold.as_millis() as u64,
            ))
            .await;
        }

        if let Err(e) = &result {
            debug!(service_id = %entry.id, error = %e, "Service call failed");
            self.emit(ServiceEvent::service_error(&entry.id, e)).await;
        }

        result
    }

    /// Status of one service
    pub fn status(&self, id: &str) -> Result<ServiceStatus> {
        self.services
            .get(id)
            .map(|e| e.status())
            .ok_or_else(|| Error::service_not_found(id))
    }

    /// Status of every service, keyed by id
    pub fn report(&self) -> BTreeMap<String, ServiceStatus> {
        self.services
            .iter()
            .map(|e| (e.key().clone(), e.status()))
            .collect()
    }

    /// Force a service's breaker closed
    pub fn reset_breaker(&self, id: &str) -> Result<()> {
        let entry = self
            .services
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::service_not_found(id))?;
        entry.breaker.reset();
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Ids of services whose breaker is currently open
    pub fn open_circuits(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .services
            .iter()
            .filter(|e| e.breaker.is_open())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    async fn emit(&self, event: ServiceEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.publisher.publish(event).await {
            warn!(event_type, error = %e, "Failed to publish event");
        }
    }
}

impl ApplicationMetricsSource for ServiceRegistry {
    fn application_metrics(&self) -> ApplicationMetrics {
        let mut metrics = ApplicationMetrics {
            registered_services: self.services.len(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ..Default::default()
        };

        let mut weighted_ms = 0.0;
        let mut weighted_samples = 0u64;

        for entry in self.services.iter() {
            let meta = entry.tracker.snapshot();
            metrics.total_calls += meta.call_count;
            metrics.total_successes += meta.success_count;
            metrics.total_failures += meta.failure_count;

            let samples = meta.performance_history.len() as u64;
            weighted_ms += meta.average_response_ms * samples as f64;
            weighted_samples += samples;

            if entry.breaker.is_open() {
                metrics.open_circuits += 1;
            }
        }

        if metrics.total_calls > 0 {
            metrics.error_rate = metrics.total_failures as f64 / metrics.total_calls as f64;
        }
        if weighted_samples > 0 {
            metrics.avg_response_ms = weighted_ms / weighted_samples as f64;
        }

        metrics
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
