//! Notifier Adapters
//!
//! Deliver fired alerts. Real channels (mail, chat, paging) plug in behind
//! the same `Notifier` port.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, warn};

use crate::domain::Notifier;
use crate::error::Result;
use crate::monitoring::{FiredAlert, Severity};

/// Notifier writing fired alerts to the tracing system
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, alert: &FiredAlert) -> Result<()> {
        let recipients = alert.recipients.join(",");
        match alert.severity {
            Severity::Critical | Severity::High => error!(
                alert = %alert.name,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                severity = %alert.severity,
                recipients = %recipients,
                "ALERT"
            ),
            Severity::Medium | Severity::Low => warn!(
                alert = %alert.name,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                severity = %alert.severity,
                recipients = %recipients,
                "ALERT"
            ),
        }
        Ok(())
    }
}

/// Notifier recording deliveries in memory, for tests
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    delivered: RwLock<Vec<FiredAlert>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<FiredAlert> {
        self.delivered.read().clone()
    }

    pub fn len(&self) -> usize {
        self.delivered.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.read().is_empty()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, alert: &FiredAlert) -> Result<()> {
        self.delivered.write().push(alert.clone());
        Ok(())
    }
}
