//! Resilience Layer
//!
//! Failure isolation for service invocation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ServiceRegistry                            │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  per service id:                                            │  │
//! │  │  ServiceConfig │ ServiceHandler │ CircuitBreaker │ Tracker  │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each service owns its breaker and tracker, so concurrent calls on
//! different ids never contend on a shared lock.

mod breaker;
mod registry;
mod tracker;

pub use breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState, Transition};
pub use registry::{
    service_fn, ServiceConfig, ServiceHandler, ServiceKind, ServiceRegistry, ServiceStatus,
};
pub use tracker::{PerformanceTracker, ServiceMetadata, MAX_PERFORMANCE_HISTORY};
