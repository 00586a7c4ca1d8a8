//! Prometheus Event Adapter
//!
//! Implements the `EventPublisher` port by turning service events into
//! Prometheus counters, exposed on `/metrics` by the binary.

use async_trait::async_trait;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::domain::{EventPublisher, ServiceEvent};
use crate::error::{Error, Result};
use crate::resilience::{CircuitState, ServiceKind};

const NAMESPACE: &str = "overwatch";

/// Event publisher that maintains Prometheus metrics.
///
/// Owns its own [`Registry`] so several instances can coexist in one
/// process (tests, embedded use).
#[derive(Clone)]
pub struct PrometheusEventPublisher {
    registry: Registry,
    registrations: IntCounterVec,
    performance_warnings: IntCounterVec,
    service_errors: IntCounterVec,
    circuit_transitions: IntCounterVec,
    circuit_open: IntGaugeVec,
    alerts_fired: IntCounterVec,
}

impl PrometheusEventPublisher {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let registrations = IntCounterVec::new(
            Opts::new("services_registered_total", "Services registered").namespace(NAMESPACE),
            &["kind"],
        )
        .map_err(prom_err)?;
        let performance_warnings = IntCounterVec::new(
            Opts::new(
                "performance_warnings_total",
                "Calls slower than the service performance threshold",
            )
            .namespace(NAMESPACE),
            &["service"],
        )
        .map_err(prom_err)?;
        let service_errors = IntCounterVec::new(
            Opts::new("service_errors_total", "Failed service calls by error kind")
                .namespace(NAMESPACE),
            &["service", "kind"],
        )
        .map_err(prom_err)?;
        let circuit_transitions = IntCounterVec::new(
            Opts::new("circuit_transitions_total", "Circuit breaker state transitions")
                .namespace(NAMESPACE),
            &["service", "to"],
        )
        .map_err(prom_err)?;
        let circuit_open = IntGaugeVec::new(
            Opts::new("circuit_open", "1 while the service breaker is not closed")
                .namespace(NAMESPACE),
            &["service"],
        )
        .map_err(prom_err)?;
        let alerts_fired = IntCounterVec::new(
            Opts::new("alerts_fired_total", "Alert firings").namespace(NAMESPACE),
            &["alert", "severity"],
        )
        .map_err(prom_err)?;

        registry
            .register(Box::new(registrations.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(performance_warnings.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(service_errors.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(circuit_transitions.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(circuit_open.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(alerts_fired.clone()))
            .map_err(prom_err)?;

        Ok(Self {
            registry,
            registrations,
            performance_warnings,
            service_errors,
            circuit_transitions,
            circuit_open,
            alerts_fired,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }

    fn observe(&self, event: &ServiceEvent) {
        match event {
            ServiceEvent::Registered { kind, .. } => {
                let kind = match kind {
                    ServiceKind::Internal => "internal",
                    ServiceKind::External => "external",
                };
                self.registrations.with_label_values(&[kind]).inc();
            }
            ServiceEvent::PerformanceWarning { service_id, .. } => {
                self.performance_warnings
                    .with_label_values(&[service_id])
                    .inc();
            }
            ServiceEvent::ServiceError {
                service_id,
                error_kind,
                ..
            } => {
                self.service_errors
                    .with_label_values(&[service_id, error_kind])
                    .inc();
            }
            ServiceEvent::CircuitStateChanged { service_id, to, .. } => {
                self.circuit_transitions
                    .with_label_values(&[service_id, &to.to_string()])
                    .inc();
                let open = i64::from(*to != CircuitState::Closed);
                self.circuit_open.with_label_values(&[service_id]).set(open);
            }
            ServiceEvent::AlertFired { name, severity, .. } => {
                self.alerts_fired
                    .with_label_values(&[name, &severity.to_string()])
                    .inc();
            }
        }
    }
}

fn prom_err(e: impl std::fmt::Display) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

impl std::fmt::Debug for PrometheusEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusEventPublisher").finish()
    }
}

#[async_trait]
impl EventPublisher for PrometheusEventPublisher {
    async fn publish(&self, event: ServiceEvent) -> Result<()> {
        self.observe(&event);
        Ok(())
    }
}
