//! Alert Engine
//!
//! Threshold rules evaluated against the latest metrics snapshot. A rule that
//! holds fires at most once per cooldown window; fired alerts are logged,
//! kept in a bounded history and handed to the [`Notifier`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::duration_serde;
use crate::domain::{EventPublisher, Notifier, ServiceEvent};
use crate::error::{Error, Result};

use super::collector::MetricsCollector;
use super::snapshot::{MetricPath, SystemMetricsSnapshot};

const EQUALS_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Rule Types
// =============================================================================

/// How a metric value is compared with the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Above,
    Below,
    Equals,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => value > threshold,
            Comparison::Below => value < threshold,
            Comparison::Equals => (value - threshold).abs() <= EQUALS_TOLERANCE,
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::Above => write!(f, "above"),
            Comparison::Below => write!(f, "below"),
            Comparison::Equals => write!(f, "equals"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Rule definition as supplied by callers and configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub metric: MetricPath,
    pub threshold: f64,
    pub comparison: Comparison,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        metric: MetricPath,
        comparison: Comparison,
        threshold: f64,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            metric,
            threshold,
            comparison,
            severity: Severity::default(),
            enabled: true,
            recipients: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Reject rules `AlertEngine::create` would refuse, apart from id clashes
    pub fn validate(&self) -> Result<()> {
        check_rule(&self.name, self.threshold)
    }
}

fn check_rule(name: &str, threshold: f64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("alert name must not be empty".into()));
    }
    if !threshold.is_finite() {
        return Err(Error::Validation(format!(
            "alert '{}' threshold must be finite",
            name
        )));
    }
    Ok(())
}

/// Partial update of a stored alert; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPatch {
    pub name: Option<String>,
    pub metric: Option<MetricPath>,
    pub threshold: Option<f64>,
    pub comparison: Option<Comparison>,
    pub severity: Option<Severity>,
    pub enabled: Option<bool>,
    pub recipients: Option<Vec<String>>,
}

/// Stored alert rule with its firing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlert {
    pub id: String,
    pub name: String,
    pub metric: MetricPath,
    pub threshold: f64,
    pub comparison: Comparison,
    pub severity: Severity,
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MetricAlert {
    fn apply(&mut self, patch: AlertPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(metric) = patch.metric {
            self.metric = metric;
        }
        if let Some(threshold) = patch.threshold {
            self.threshold = threshold;
        }
        if let Some(comparison) = patch.comparison {
            self.comparison = comparison;
        }
        if let Some(severity) = patch.severity {
            self.severity = severity;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(recipients) = patch.recipients {
            self.recipients = recipients;
        }
    }

    fn validate(&self) -> Result<()> {
        check_rule(&self.name, self.threshold)
    }

    /// Whether the alert fired within `cooldown` before `now`
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_triggered {
            None => false,
            // A timestamp ahead of `now` counts as still cooling down
            Some(last) => (now - last).to_std().map_or(true, |elapsed| elapsed < cooldown),
        }
    }
}

/// Record of one firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredAlert {
    pub alert_id: String,
    pub name: String,
    pub metric: MetricPath,
    pub value: f64,
    pub threshold: f64,
    pub comparison: Comparison,
    pub severity: Severity,
    pub recipients: Vec<String>,
    pub fired_at: DateTime<Utc>,
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    #[serde(with = "duration_serde")]
    pub evaluation_interval: Duration,
    /// Minimum time between two firings of the same rule
    #[serde(with = "duration_serde")]
    pub cooldown: Duration,
    pub max_fired_history: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            max_fired_history: 1000,
        }
    }
}

// =============================================================================
// Alert Engine
// =============================================================================

pub struct AlertEngine {
    config: AlertEngineConfig,
    alerts: DashMap<String, MetricAlert>,
    fired: RwLock<VecDeque<FiredAlert>>,
    notifier: Arc<dyn Notifier>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl AlertEngine {
    pub fn new(config: AlertEngineConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            alerts: DashMap::new(),
            fired: RwLock::new(VecDeque::new()),
            notifier,
            publisher: None,
        }
    }

    /// Also publish `alert-fired` events
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &AlertEngineConfig {
        &self.config
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Store a new rule and return its id
    pub fn create(&self, rule: AlertRule) -> Result<String> {
        let id = rule
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let alert = MetricAlert {
            id: id.clone(),
            name: rule.name,
            metric: rule.metric,
            threshold: rule.threshold,
            comparison: rule.comparison,
            severity: rule.severity,
            enabled: rule.enabled,
            recipients: rule.recipients,
            last_triggered: None,
            created_at: Utc::now(),
        };
        alert.validate()?;

        match self.alerts.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::Validation(format!("alert id already exists: {}", id)))
            }
            Entry::Vacant(slot) => {
                slot.insert(alert);
            }
        }

        info!(alert_id = %id, "Alert rule created");
        Ok(id)
    }

    /// Apply a patch, returning the updated rule
    pub fn update(&self, id: &str, patch: AlertPatch) -> Result<MetricAlert> {
        let mut alert = self
            .alerts
            .get_mut(id)
            .ok_or_else(|| Error::alert_not_found(id))?;

        let mut updated = alert.clone();
        updated.apply(patch);
        updated.validate()?;
        *alert = updated.clone();

        debug!(alert_id = %id, "Alert rule updated");
        Ok(updated)
    }

    /// Remove a rule, returning it
    pub fn delete(&self, id: &str) -> Result<MetricAlert> {
        self.alerts
            .remove(id)
            .map(|(_, alert)| {
                info!(alert_id = %id, "Alert rule deleted");
                alert
            })
            .ok_or_else(|| Error::alert_not_found(id))
    }

    pub fn get(&self, id: &str) -> Result<MetricAlert> {
        self.alerts
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| Error::alert_not_found(id))
    }

    /// All rules in creation order
    pub fn list(&self) -> Vec<MetricAlert> {
        let mut alerts: Vec<MetricAlert> = self.alerts.iter().map(|a| a.clone()).collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    pub fn contains(&self, id: &str) -> bool {
        self.alerts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate every enabled rule against `snapshot` as of `now`
    #[instrument(skip(self, snapshot), fields(rules = self.alerts.len()))]
    pub async fn evaluate(
        &self,
        snapshot: &SystemMetricsSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<FiredAlert> {
        let mut fired = Vec::new();

        // last_triggered is written under the entry lock
        for mut alert in self.alerts.iter_mut() {
            if !alert.enabled {
                continue;
            }
            let Some(value) = snapshot.value(alert.metric) else {
                continue;
            };
            if !alert.comparison.holds(value, alert.threshold) {
                continue;
            }
            if alert.in_cooldown(now, self.config.cooldown) {
                debug!(alert_id = %alert.id, "Alert condition holds but cooldown active");
                continue;
            }

            alert.last_triggered = Some(now);
            fired.push(FiredAlert {
                alert_id: alert.id.clone(),
                name: alert.name.clone(),
                metric: alert.metric,
                value,
                threshold: alert.threshold,
                comparison: alert.comparison,
                severity: alert.severity,
                recipients: alert.recipients.clone(),
                fired_at: now,
            });
        }

        for alert in &fired {
            self.dispatch(alert).await;
        }
        fired
    }

    /// Evaluate against the collector's most recent snapshot
    pub async fn evaluate_latest(&self, collector: &MetricsCollector) -> Vec<FiredAlert> {
        match collector.latest() {
            Some(snapshot) => self.evaluate(&snapshot, Utc::now()).await,
            None => {
                debug!("No metrics collected yet, skipping alert evaluation");
                Vec::new()
            }
        }
    }

    async fn dispatch(&self, alert: &FiredAlert) {
        warn!(
            alert_id = %alert.alert_id,
            name = %alert.name,
            metric = %alert.metric,
            value = alert.value,
            threshold = alert.threshold,
            comparison = %alert.comparison,
            severity = %alert.severity,
            "Alert fired"
        );

        {
            let cap = self.config.max_fired_history.max(1);
            let mut history = self.fired.write();
            history.push_back(alert.clone());
            while history.len() > cap {
                history.pop_front();
            }
        }

        if let Err(e) = self.notifier.notify(alert).await {
            error!(alert_id = %alert.alert_id, error = %e, "Alert notification failed");
        }

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(ServiceEvent::alert_fired(alert)).await {
                warn!(alert_id = %alert.alert_id, error = %e, "Failed to publish alert event");
            }
        }
    }

    /// Rules that fired within the cooldown window ending at `now`
    pub fn active_alerts(&self, now: DateTime<Utc>) -> Vec<MetricAlert> {
        let mut active: Vec<MetricAlert> = self
            .alerts
            .iter()
            .filter(|a| a.in_cooldown(now, self.config.cooldown))
            .map(|a| a.clone())
            .collect();
        active.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));
        active
    }

    /// Most recent firings, oldest first
    pub fn fired_history(&self, limit: Option<usize>) -> Vec<FiredAlert> {
        let history = self.fired.read();
        let skip = limit.map_or(0, |l| history.len().saturating_sub(l));
        history.iter().skip(skip).cloned().collect()
    }

    /// Evaluate on every `evaluation_interval` tick until `shutdown` fires
    pub async fn run(self: Arc<Self>, collector: Arc<MetricsCollector>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.evaluation_interval.as_millis() as u64,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "Alert engine started"
        );

        let mut ticker = tokio::time::interval(self.config.evaluation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.evaluate_latest(&collector).await;
                }
            }
        }

        info!("Alert engine stopped");
    }
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("config", &self.config)
            .field("alerts", &self.alerts.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
