//! Monitoring
//!
//! Metric collection, dependency health checks and threshold alerting.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                             Monitoring                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────────┐  │
//! │  │ SystemSampler  │  │ ServiceRegistry    │  │ DatabaseSampler        │  │
//! │  │ (host)         │  │ (application)      │  │ (optional)             │  │
//! │  └────────────────┘  └────────────────────┘  └────────────────────────┘  │
//! │          └────────────────────┬────────────────────────┘                 │
//! │                    ┌─────────────────────┐                               │
//! │                    │  MetricsCollector   │──▶ bounded history            │
//! │                    └─────────────────────┘                               │
//! │                               │ latest()                                 │
//! │                    ┌─────────────────────┐                               │
//! │                    │    AlertEngine      │──▶ Notifier, EventPublisher   │
//! │                    └─────────────────────┘                               │
//! │                                                                          │
//! │   HealthChecker ──▶ HealthProbe per dependency ──▶ latest HealthCheck    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each component runs as its own task driven by a `tokio::time::interval`
//! and stops when its `CancellationToken` is cancelled.

mod alerts;
mod collector;
mod health;
mod snapshot;

pub use alerts::{
    AlertEngine, AlertEngineConfig, AlertPatch, AlertRule, Comparison, FiredAlert, MetricAlert,
    Severity,
};
pub use collector::{CollectorConfig, CollectorStats, MetricsCollector};
pub use health::{HealthCheck, HealthChecker, HealthCheckerConfig, HealthReport, HealthStatus};
pub use snapshot::{
    ApplicationMetrics, CpuMetrics, DatabaseMetrics, MemoryMetrics, MetricPath, NetworkMetrics,
    SystemMetrics, SystemMetricsSnapshot,
};
