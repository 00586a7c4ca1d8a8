//! Metric Snapshots
//!
//! Structured point-in-time view of host, application and database health,
//! plus [`MetricPath`], the typed address of one value inside a snapshot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// =============================================================================
// Metric Groups
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    /// Average usage across cores, percent
    pub usage: f64,
    /// One-minute load average
    pub load_average: f64,
    pub cores: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub used_bytes: u64,
    pub total_bytes: u64,
    /// Used share of total, percent
    pub usage: f64,
}

impl MemoryMetrics {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        let usage = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };
        Self {
            used_bytes,
            total_bytes,
            usage,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
}

/// Host-level metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub network: NetworkMetrics,
}

/// Aggregates over the service registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMetrics {
    pub registered_services: usize,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Failures over calls, 0..=1
    pub error_rate: f64,
    pub avg_response_ms: f64,
    pub open_circuits: usize,
    pub uptime_secs: u64,
}

/// Database metrics supplied by an external sampler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetrics {
    pub active_connections: u64,
    pub avg_query_ms: f64,
    pub slow_queries: u64,
}

/// One collection tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    #[serde(default)]
    pub application: Option<ApplicationMetrics>,
    #[serde(default)]
    pub database: Option<DatabaseMetrics>,
}

impl SystemMetricsSnapshot {
    /// Snapshot taken now
    pub fn new(system: SystemMetrics) -> Self {
        Self::at(Utc::now(), system)
    }

    /// Snapshot with an explicit timestamp
    pub fn at(timestamp: DateTime<Utc>, system: SystemMetrics) -> Self {
        Self {
            timestamp,
            system,
            application: None,
            database: None,
        }
    }

    pub fn with_application(mut self, application: ApplicationMetrics) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_database(mut self, database: DatabaseMetrics) -> Self {
        self.database = Some(database);
        self
    }

    /// Resolve a metric; `None` when its group is absent
    pub fn value(&self, path: MetricPath) -> Option<f64> {
        let cpu = &self.system.cpu;
        let memory = &self.system.memory;
        let network = &self.system.network;
        let app = self.application.as_ref();
        let db = self.database.as_ref();

        match path {
            MetricPath::CpuUsage => Some(cpu.usage),
            MetricPath::CpuLoadAverage => Some(cpu.load_average),
            MetricPath::CpuCores => Some(cpu.cores as f64),
            MetricPath::MemoryUsage => Some(memory.usage),
            MetricPath::MemoryUsedBytes => Some(memory.used_bytes as f64),
            MetricPath::MemoryTotalBytes => Some(memory.total_bytes as f64),
            MetricPath::NetworkBytesIn => Some(network.bytes_in_per_sec),
            MetricPath::NetworkBytesOut => Some(network.bytes_out_per_sec),
            MetricPath::AppServices => app.map(|a| a.registered_services as f64),
            MetricPath::AppTotalCalls => app.map(|a| a.total_calls as f64),
            MetricPath::AppTotalFailures => app.map(|a| a.total_failures as f64),
            MetricPath::AppErrorRate => app.map(|a| a.error_rate),
            MetricPath::AppAvgResponseMs => app.map(|a| a.avg_response_ms),
            MetricPath::AppOpenCircuits => app.map(|a| a.open_circuits as f64),
            MetricPath::AppUptimeSecs => app.map(|a| a.uptime_secs as f64),
            MetricPath::DbConnections => db.map(|d| d.active_connections as f64),
            MetricPath::DbAvgQueryMs => db.map(|d| d.avg_query_ms),
            MetricPath::DbSlowQueries => db.map(|d| d.slow_queries as f64),
        }
    }
}

// =============================================================================
// Metric Path
// =============================================================================

/// Typed address of a snapshot value, written as a dot path such as `cpu.usage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricPath {
    CpuUsage,
    CpuLoadAverage,
    CpuCores,
    MemoryUsage,
    MemoryUsedBytes,
    MemoryTotalBytes,
    NetworkBytesIn,
    NetworkBytesOut,
    AppServices,
    AppTotalCalls,
    AppTotalFailures,
    AppErrorRate,
    AppAvgResponseMs,
    AppOpenCircuits,
    AppUptimeSecs,
    DbConnections,
    DbAvgQueryMs,
    DbSlowQueries,
}

impl MetricPath {
    pub const ALL: [MetricPath; 18] = [
        MetricPath::CpuUsage,
        MetricPath::CpuLoadAverage,
        MetricPath::CpuCores,
        MetricPath::MemoryUsage,
        MetricPath::MemoryUsedBytes,
        MetricPath::MemoryTotalBytes,
        MetricPath::NetworkBytesIn,
        MetricPath::NetworkBytesOut,
        MetricPath::AppServices,
        MetricPath::AppTotalCalls,
        MetricPath::AppTotalFailures,
        MetricPath::AppErrorRate,
        MetricPath::AppAvgResponseMs,
        MetricPath::AppOpenCircuits,
        MetricPath::AppUptimeSecs,
        MetricPath::DbConnections,
        MetricPath::DbAvgQueryMs,
        MetricPath::DbSlowQueries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricPath::CpuUsage => "cpu.usage",
            MetricPath::CpuLoadAverage => "cpu.load_average",
            MetricPath::CpuCores => "cpu.cores",
            MetricPath::MemoryUsage => "memory.usage",
            MetricPath::MemoryUsedBytes => "memory.used_bytes",
            MetricPath::MemoryTotalBytes => "memory.total_bytes",
            MetricPath::NetworkBytesIn => "network.bytes_in_per_sec",
            MetricPath::NetworkBytesOut => "network.bytes_out_per_sec",
            MetricPath::AppServices => "application.registered_services",
            MetricPath::AppTotalCalls => "application.total_calls",
            MetricPath::AppTotalFailures => "application.total_failures",
            MetricPath::AppErrorRate => "application.error_rate",
            MetricPath::AppAvgResponseMs => "application.avg_response_ms",
            MetricPath::AppOpenCircuits => "application.open_circuits",
            MetricPath::AppUptimeSecs => "application.uptime_secs",
            MetricPath::DbConnections => "database.active_connections",
            MetricPath::DbAvgQueryMs => "database.avg_query_ms",
            MetricPath::DbSlowQueries => "database.slow_queries",
        }
    }
}

impl fmt::Display for MetricPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("system.").unwrap_or(s);
        MetricPath::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown metric path: {}", s)))
    }
}

impl TryFrom<String> for MetricPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MetricPath> for String {
    fn from(path: MetricPath) -> Self {
        path.as_str().to_string()
    }
}
