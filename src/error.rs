//! Error types for Overwatch

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by service handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in Overwatch
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Invocation Errors
    // =========================================================================
    /// Bad registration or rule input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown service, alert or dependency id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Breaker is open, the call was rejected without reaching the service
    #[error("Circuit open for service: {service_id}")]
    CircuitOpen { service_id: String },

    /// The service call exceeded its configured timeout
    #[error("Service {service_id} timed out after {timeout:?}")]
    Timeout {
        service_id: String,
        timeout: Duration,
    },

    /// The wrapped service failed on its own
    #[error("Service {service_id} failed: {source}")]
    Underlying {
        service_id: String,
        #[source]
        source: BoxError,
    },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Host metrics sampling failed
    #[error("Metrics sampling failed: {0}")]
    Sampling(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an unknown service id
    pub fn service_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "Service",
            id: id.into(),
        }
    }

    /// Shorthand for an unknown alert id
    pub fn alert_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "Alert",
            id: id.into(),
        }
    }

    /// Stable short name used in events and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound { .. } => "not_found",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::Timeout { .. } => "timeout",
            Error::Underlying { .. } => "underlying",
            Error::Config(_) => "config",
            Error::DurationParse(_) => "duration_parse",
            Error::Io(_) => "io",
            Error::Yaml(_) => "yaml",
            Error::Http(_) => "http",
            Error::Sampling(_) => "sampling",
            Error::Internal(_) => "internal",
        }
    }
}
