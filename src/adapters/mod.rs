//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  EventPublisher │ Notifier │ HealthProbe │ SystemSampler   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ LoggingEventPublisher │ PrometheusEventPublisher          │ │
//! │  │ ChannelEventPublisher │ LoggingNotifier │ SysinfoSampler  │ │
//! │  │ TcpProbe │ HttpProbe │ RegistryProbe │ http_service_handler│ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use overwatch::adapters::{CompositeEventPublisher, LoggingEventPublisher, PrometheusEventPublisher};
//!
//! let prometheus = Arc::new(PrometheusEventPublisher::new()?);
//! let publisher = CompositeEventPublisher::new()
//!     .with_publisher(LoggingEventPublisher::info_level())
//!     .with_publisher(prometheus.clone());
//! ```

mod event_publisher;
mod host_sampler;
mod http_service;
mod notifier;
mod probes;
mod prometheus;

pub use event_publisher::{
    ChannelEventPublisher, CompositeEventPublisher, InMemoryEventCollector, LoggingEventPublisher,
};
pub use host_sampler::SysinfoSampler;
pub use http_service::http_service_handler;
pub use notifier::{InMemoryNotifier, LoggingNotifier};
pub use probes::{probe_from_config, FnProbe, HttpProbe, RegistryProbe, TcpProbe};
pub use prometheus::PrometheusEventPublisher;
