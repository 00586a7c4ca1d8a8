//! Domain Events
//!
//! Immutable records of things that happened inside the registry and the
//! alert engine. They are handed to an [`EventPublisher`](super::EventPublisher)
//! wired at construction time.
//!
//! # Example
//!
//! ```ignore
//! let event = ServiceEvent::performance_warning("billing", 1800, 1000);
//! publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::{FiredAlert, Severity};
use crate::resilience::{CircuitState, ServiceKind};

/// Event published by Overwatch components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServiceEvent {
    // =========================================================================
    // Registry Events
    // =========================================================================
    /// A service was added to the registry.
    Registered {
        service_id: String,
        name: String,
        kind: ServiceKind,
        timestamp: DateTime<Utc>,
    },

    /// A call completed slower than the service's performance threshold.
    PerformanceWarning {
        service_id: String,
        duration_ms: u64,
        threshold_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A call failed, was rejected by the breaker, or timed out.
    ServiceError {
        service_id: String,
        error_kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A breaker moved between states.
    CircuitStateChanged {
        service_id: String,
        from: CircuitState,
        to: CircuitState,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Alert Events
    // =========================================================================
    /// An alert rule fired.
    AlertFired {
        alert_id: String,
        name: String,
        metric: String,
        value: f64,
        threshold: f64,
        severity: Severity,
        timestamp: DateTime<Utc>,
    },
}

impl ServiceEvent {
    /// Stable event name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServiceEvent::Registered { .. } => "registered",
            ServiceEvent::PerformanceWarning { .. } => "performance-warning",
            ServiceEvent::ServiceError { .. } => "service-error",
            ServiceEvent::CircuitStateChanged { .. } => "circuit-state-changed",
            ServiceEvent::AlertFired { .. } => "alert-fired",
        }
    }

    /// Service the event concerns, if any.
    pub fn service_id(&self) -> Option<&str> {
        match self {
            ServiceEvent::Registered { service_id, .. }
            | ServiceEvent::PerformanceWarning { service_id, .. }
            | ServiceEvent::ServiceError { service_id, .. }
            | ServiceEvent::CircuitStateChanged { service_id, .. } => Some(service_id),
            ServiceEvent::AlertFired { .. } => None,
        }
    }

    /// When the event happened.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ServiceEvent::Registered { timestamp, .. }
            | ServiceEvent::PerformanceWarning { timestamp, .. }
            | ServiceEvent::ServiceError { timestamp, .. }
            | ServiceEvent::CircuitStateChanged { timestamp, .. }
            | ServiceEvent::AlertFired { timestamp, .. } => *timestamp,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn registered(service_id: impl Into<String>, name: impl Into<String>, kind: ServiceKind) -> Self {
        ServiceEvent::Registered {
            service_id: service_id.into(),
            name: name.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn performance_warning(service_id: impl Into<String>, duration_ms: u64, threshold_ms: u64) -> Self {
        ServiceEvent::PerformanceWarning {
            service_id: service_id.into(),
            duration_ms,
            threshold_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn service_error(service_id: impl Into<String>, error: &crate::error::Error) -> Self {
        ServiceEvent::ServiceError {
            service_id: service_id.into(),
            error_kind: error.kind().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn circuit_state_changed(service_id: impl Into<String>, from: CircuitState, to: CircuitState) -> Self {
        ServiceEvent::CircuitStateChanged {
            service_id: service_id.into(),
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    pub fn alert_fired(alert: &FiredAlert) -> Self {
        ServiceEvent::AlertFired {
            alert_id: alert.alert_id.clone(),
            name: alert.name.clone(),
            metric: alert.metric.to_string(),
            value: alert.value,
            threshold: alert.threshold,
            severity: alert.severity,
            timestamp: alert.fired_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let events = vec![
            ServiceEvent::registered("svc", "Service", ServiceKind::Internal),
            ServiceEvent::performance_warning("svc", 1500, 1000),
            ServiceEvent::service_error("svc", &Error::service_not_found("svc")),
            ServiceEvent::circuit_state_changed("svc", CircuitState::Closed, CircuitState::Open),
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
            assert_eq!(event.service_id(), Some("svc"));
        }
    }

    #[test]
    fn test_service_error_carries_kind() {
        let err = Error::CircuitOpen {
            service_id: "svc".into(),
        };
        match ServiceEvent::service_error("svc", &err) {
            ServiceEvent::ServiceError {
                error_kind, message, ..
            } => {
                assert_eq!(error_kind, "circuit_open");
                assert!(message.contains("svc"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_roundtrip() {
        let event = ServiceEvent::circuit_state_changed("svc", CircuitState::Open, CircuitState::HalfOpen);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"circuit-state-changed\""));
        assert!(json.contains("\"to\":\"half_open\""));

        let back: ServiceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
