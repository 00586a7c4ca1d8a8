//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port with various backends.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::{EventPublisher, ServiceEvent};
use crate::error::Result;

/// Logging-based event publisher.
///
/// Publishes service events to the tracing system.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Create a publisher that logs at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: ServiceEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type = %event_type, event = %json, "Service event");
        } else {
            debug!(event_type = %event_type, event = %json, "Service event");
        }

        Ok(())
    }
}

/// In-memory event collector for testing.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<ServiceEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events whose `type` tag equals `event_type`.
    pub fn events_of_type(&self, event_type: &str) -> Vec<ServiceEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Get events concerning one service.
    pub fn events_for(&self, service_id: &str) -> Vec<ServiceEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.service_id() == Some(service_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: ServiceEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<ServiceEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

/// Fan-out publisher backed by a `tokio::sync::broadcast` channel.
///
/// Publishing never fails: with no subscribers the event is dropped, and
/// lagging subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: broadcast::Sender<ServiceEvent>,
}

impl ChannelEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: ServiceEvent) -> Result<()> {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Composite event publisher that publishes to multiple backends.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Box<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher to the composite.
    pub fn with_publisher<P: EventPublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: ServiceEvent) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(event.clone()).await?;
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<ServiceEvent>) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish_all(events.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<P> {
    async fn publish(&self, event: ServiceEvent) -> Result<()> {
        (**self).publish(event).await
    }

    async fn publish_all(&self, events: Vec<ServiceEvent>) -> Result<()> {
        (**self).publish_all(events).await
    }
}
