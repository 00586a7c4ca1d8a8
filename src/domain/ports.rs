//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the core components depend on. Adapters in
//! [`crate::adapters`] provide the concrete implementations.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │   EventPublisher │ Notifier │ HealthProbe │ SystemSampler   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  LoggingEventPublisher │ PrometheusEventPublisher │ TcpProbe │
//! │  HttpProbe │ SysinfoSampler │ LoggingNotifier               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::monitoring::{ApplicationMetrics, DatabaseMetrics, FiredAlert, SystemMetrics};

use super::events::ServiceEvent;

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events to observability consumers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: ServiceEvent) -> Result<()>;

    /// Publish a batch of events in order.
    async fn publish_all(&self, events: Vec<ServiceEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Notifier Port
// =============================================================================

/// Port for delivering fired alerts to their recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a fired alert.
    async fn notify(&self, alert: &FiredAlert) -> Result<()>;
}

// =============================================================================
// Health Probe Port
// =============================================================================

/// Result of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Dependency answered normally
    Up,
    /// Dependency answered but reports reduced capability
    Degraded(String),
}

/// Port for checking one dependency.
///
/// Errors are classified as unhealthy by the health checker, they never
/// escape the probing loop.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<ProbeOutcome>;
}

// =============================================================================
// Sampling Ports
// =============================================================================

/// Port for sampling host-level metrics.
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> Result<SystemMetrics>;
}

/// Port for sampling database metrics from an external collaborator.
#[async_trait]
pub trait DatabaseSampler: Send + Sync {
    async fn sample(&self) -> Result<DatabaseMetrics>;
}

/// Source of application-level aggregates (implemented by the registry).
pub trait ApplicationMetricsSource: Send + Sync {
    fn application_metrics(&self) -> ApplicationMetrics;
}
