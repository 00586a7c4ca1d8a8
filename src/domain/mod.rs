//! Domain Layer
//!
//! Core abstractions shared by the resilience and monitoring components.
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for external collaborators
//! - **Events** (`events.rs`) - Domain events for logging and telemetry
//!
//! # Usage
//!
//! ```ignore
//! use overwatch::domain::{EventPublisher, ServiceEvent};
//!
//! async fn announce<P: EventPublisher>(publisher: &P) -> Result<()> {
//!     publisher
//!         .publish(ServiceEvent::performance_warning("billing", 1800, 1000))
//!         .await
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::ServiceEvent;
pub use ports::{
    ApplicationMetricsSource, DatabaseSampler, EventPublisher, HealthProbe, Notifier,
    ProbeOutcome, SystemSampler,
};
