//! Configuration
//!
//! File-based configuration for the whole Overwatch context. Every section is
//! optional and falls back to the component defaults.
//!
//! ```yaml
//! metrics:
//!   collection_interval: 60s
//!   max_history: 1000
//! health:
//!   check_interval: 30s
//!   probe_timeout: 5s
//! alerts:
//!   evaluation_interval: 30s
//!   cooldown: 5m
//! rules:
//!   - name: cpu-hot
//!     metric: cpu.usage
//!     threshold: 80
//!     comparison: above
//!     severity: high
//! dependencies:
//!   - name: postgres
//!     kind: tcp
//!     address: 127.0.0.1:5432
//! services:
//!   - id: billing
//!     name: Billing API
//!     kind: external
//!     endpoint: http://billing.internal/invoke
//!     timeout: 2s
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::monitoring::{AlertEngineConfig, AlertRule, CollectorConfig, HealthCheckerConfig};
use crate::resilience::ServiceConfig;

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string such as `30s`, `5m`, `1h30m` or `250ms`.
///
/// A trailing bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'm' | 'M' if matches!(chars.peek(), Some('s') | Some('S')) => {
                chars.next();
                1
            }
            'd' | 'D' => 86_400_000,
            'h' | 'H' => 3_600_000,
            'm' | 'M' => 60_000,
            's' | 'S' => 1_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_ms = accumulate(total_ms, num, multiplier, s)?;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = accumulate(total_ms, num, 1_000, s)?;
    }

    Ok(Duration::from_millis(total_ms))
}

fn accumulate(total_ms: u64, num: u64, multiplier: u64, s: &str) -> Result<u64> {
    num.checked_mul(multiplier)
        .and_then(|ms| total_ms.checked_add(ms))
        .ok_or_else(|| Error::DurationParse(format!("duration out of range: {}", s)))
}

/// Render a duration in the same notation `parse_duration` accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1_000 != 0 {
        format!("{}ms", ms)
    } else if ms != 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else {
        format!("{}s", ms / 1_000)
    }
}

/// Serde adapter for `Duration` fields: strings like `30s` or integer milliseconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            RawDuration::Text(s) => super::parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Serde adapter for `Option<Duration>` fields.
pub mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::duration_serde::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::duration_serde")] Duration);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

// =============================================================================
// Dependency Configuration
// =============================================================================

/// How a configured dependency is probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeConfig {
    /// TCP connect to `address`
    Tcp { address: String },
    /// HTTP GET against `url`
    Http { url: String },
}

/// A dependency declared in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Dependency name, unique within the health checker
    pub name: String,

    /// Probe definition
    #[serde(flatten)]
    pub probe: ProbeConfig,

    /// Latency above which the dependency is reported degraded
    #[serde(default, with = "option_duration_serde")]
    pub degraded_latency: Option<Duration>,
}

// =============================================================================
// Overwatch Configuration
// =============================================================================

/// Complete configuration of an Overwatch context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverwatchConfig {
    /// Metrics collector settings
    #[serde(rename = "metrics")]
    pub collector: CollectorConfig,

    /// Health checker settings
    pub health: HealthCheckerConfig,

    /// Alert engine settings
    pub alerts: AlertEngineConfig,

    /// Alert rules installed at startup
    pub rules: Vec<AlertRule>,

    /// Dependencies probed by the health checker
    pub dependencies: Vec<DependencyConfig>,

    /// External services invoked over HTTP
    pub services: Vec<ServiceConfig>,
}

impl OverwatchConfig {
    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: OverwatchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.collector.collection_interval.is_zero() {
            return Err(Error::Config("metrics.collection_interval must be > 0".into()));
        }
        if self.collector.max_history == 0 {
            return Err(Error::Config("metrics.max_history must be > 0".into()));
        }
        if self.health.check_interval.is_zero() {
            return Err(Error::Config("health.check_interval must be > 0".into()));
        }
        if self.alerts.evaluation_interval.is_zero() {
            return Err(Error::Config("alerts.evaluation_interval must be > 0".into()));
        }

        let mut names = std::collections::HashSet::new();
        for dep in &self.dependencies {
            if !names.insert(dep.name.as_str()) {
                return Err(Error::Config(format!("duplicate dependency: {}", dep.name)));
            }
        }

        for service in &self.services {
            if service.endpoint.is_none() {
                return Err(Error::Config(format!(
                    "configured service '{}' needs an endpoint",
                    service.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::monitoring::{Comparison, MetricPath, Severity};
    use crate::resilience::ServiceKind;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1s500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_matches!(
            parse_duration("300000000000000d"),
            Err(Error::DurationParse(_))
        );
        assert_matches!(
            parse_duration("18446744073709551615s"),
            Err(Error::DurationParse(_))
        );
        assert_matches!(
            parse_duration("18446744073709551615ms1ms"),
            Err(Error::DurationParse(_))
        );
        assert_eq!(
            parse_duration("18446744073709551615ms").unwrap(),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OverwatchConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.collector.collection_interval, Duration::from_secs(60));
        assert_eq!(config.collector.max_history, 1000);
        assert_eq!(config.health.check_interval, Duration::from_secs(30));
        assert_eq!(config.alerts.cooldown, Duration::from_secs(300));
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
metrics:
  collection_interval: 10s
  max_history: 50
health:
  check_interval: 15s
  probe_timeout: 2s
alerts:
  cooldown: 1m
rules:
  - name: cpu-hot
    metric: cpu.usage
    threshold: 80
    comparison: above
    severity: high
    recipients: [ops@example.com]
dependencies:
  - name: postgres
    kind: tcp
    address: 127.0.0.1:5432
    degraded_latency: 200ms
  - name: search
    kind: http
    url: http://search.internal/health
services:
  - id: billing
    name: Billing API
    kind: external
    endpoint: http://billing.internal/invoke
    timeout: 2s
    circuit_breaker:
      failure_threshold: 0.25
      reset_timeout: 10s
"#;
        let config = OverwatchConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.collector.collection_interval, Duration::from_secs(10));
        assert_eq!(config.collector.max_history, 50);
        assert_eq!(config.health.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.alerts.cooldown, Duration::from_secs(60));

        let rule = &config.rules[0];
        assert_eq!(rule.metric, MetricPath::CpuUsage);
        assert_eq!(rule.comparison, Comparison::Above);
        assert_eq!(rule.severity, Severity::High);
        assert!(rule.enabled);

        assert_eq!(config.dependencies.len(), 2);
        assert_eq!(
            config.dependencies[0].probe,
            ProbeConfig::Tcp {
                address: "127.0.0.1:5432".into()
            }
        );
        assert_eq!(
            config.dependencies[0].degraded_latency,
            Some(Duration::from_millis(200))
        );

        let service = &config.services[0];
        assert_eq!(service.kind, ServiceKind::External);
        assert_eq!(service.timeout, Duration::from_secs(2));
        assert_eq!(service.circuit_breaker.failure_threshold, 0.25);
        assert_eq!(service.circuit_breaker.reset_timeout, Duration::from_secs(10));
        assert_eq!(service.circuit_breaker.minimum_calls, 2);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let yaml = r#"
rules:
  - name: bogus
    metric: cpu.temperature
    threshold: 1
    comparison: above
"#;
        assert!(OverwatchConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_duplicate_dependency_rejected() {
        let yaml = r#"
dependencies:
  - { name: db, kind: tcp, address: "127.0.0.1:1" }
  - { name: db, kind: tcp, address: "127.0.0.1:2" }
"#;
        let err = OverwatchConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_service_without_endpoint_rejected() {
        let yaml = r#"
services:
  - name: orphan
"#;
        let err = OverwatchConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
