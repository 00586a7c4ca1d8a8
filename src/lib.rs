//! Overwatch - Service Invocation Resilience Layer
//!
//! Wraps callable services in per-service circuit breakers, tracks rolling
//! performance statistics, and feeds a threshold-based alerting and
//! dependency health-check subsystem.
//!
//! # Architecture
//!
//! ```text
//! caller ─▶ ServiceRegistry ─▶ CircuitBreaker ─▶ handler
//!                 │                   │
//!                 ▼                   ▼
//!        PerformanceTracker     EventPublisher
//!                 │
//!                 ▼
//!        MetricsCollector ─▶ AlertEngine ─▶ Notifier
//!
//!        HealthChecker ─▶ HealthProbe per dependency
//! ```
//!
//! Everything is owned by an explicit [`Overwatch`] context; there is no
//! global state.
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`config`] - YAML configuration and duration parsing
//! - [`domain`] - Ports and events
//! - [`error`] - Error types
//! - [`monitoring`] - Metrics collection, health checks and alerting
//! - [`overwatch`] - The context handle
//! - [`resilience`] - Circuit breaker, performance tracker, service registry

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitoring;
pub mod overwatch;
pub mod resilience;

// Re-export commonly used types
pub use config::OverwatchConfig;
pub use error::{BoxError, Error, Result};
pub use overwatch::{Overwatch, OverwatchBuilder, SystemStatus};
pub use resilience::{BreakerConfig, CircuitState, ServiceConfig, ServiceRegistry};
