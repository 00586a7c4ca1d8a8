//! Overwatch Integration Tests
//!
//! End-to-end behavior through the public API:
//! - Service invocation through circuit breakers
//! - Metric alerting with cooldown
//! - Bounded metrics history
//! - Context wiring and system status

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::{json, Value};

use overwatch::adapters::{InMemoryEventCollector, InMemoryNotifier};
use overwatch::domain::{ServiceEvent, SystemSampler};
use overwatch::monitoring::{
    AlertEngine, AlertEngineConfig, AlertRule, CollectorConfig, Comparison, CpuMetrics,
    MetricPath, MetricsCollector, Severity, SystemMetrics, SystemMetricsSnapshot,
};
use overwatch::{
    BoxError, BreakerConfig, CircuitState, Error, Overwatch, OverwatchConfig, ServiceConfig,
    ServiceRegistry,
};

// =============================================================================
// Helpers
// =============================================================================

struct IdleHost;

impl SystemSampler for IdleHost {
    fn sample(&self) -> overwatch::Result<SystemMetrics> {
        Ok(SystemMetrics::default())
    }
}

fn registry() -> (ServiceRegistry, Arc<InMemoryEventCollector>) {
    let events = Arc::new(InMemoryEventCollector::new());
    (ServiceRegistry::new(events.clone()), events)
}

/// Handler that fails while `failing` is set and counts its invocations
fn switchable(
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicU32>,
) -> impl Fn(Value) -> futures::future::BoxFuture<'static, Result<Value, BoxError>> + Send + Sync + 'static
{
    move |args| {
        let failing = failing.clone();
        let calls = calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if failing.load(Ordering::SeqCst) {
                Err::<Value, BoxError>("service unavailable".into())
            } else {
                Ok(args)
            }
        })
    }
}

fn svc_a_config() -> ServiceConfig {
    ServiceConfig::new("Service A")
        .with_id("svc-A")
        .with_circuit_breaker(
            BreakerConfig::default()
                .with_failure_threshold(0.5)
                .with_reset_timeout(Duration::from_millis(1000)),
        )
}

fn cpu_snapshot(usage: f64, at: chrono::DateTime<Utc>) -> SystemMetricsSnapshot {
    SystemMetricsSnapshot::at(
        at,
        SystemMetrics {
            cpu: CpuMetrics {
                usage,
                ..Default::default()
            },
            ..Default::default()
        },
    )
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenario_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_failures_open_breaker_then_success_closes() {
        let (registry, events) = registry();
        let failing = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(svc_a_config(), switchable(failing.clone(), calls.clone()))
            .await
            .unwrap();

        // Two consecutive failures open the breaker
        for _ in 0..2 {
            assert_matches!(
                registry.execute("svc-A", json!({})).await,
                Err(Error::Underlying { .. })
            );
        }
        assert_eq!(registry.status("svc-A").unwrap().state(), CircuitState::Open);

        // Immediate third call is rejected without reaching the handler
        assert_matches!(
            registry.execute("svc-A", json!({})).await,
            Err(Error::CircuitOpen { .. })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // After the reset timeout a successful trial closes it
        tokio::time::advance(Duration::from_millis(1000)).await;
        failing.store(false, Ordering::SeqCst);
        assert_eq!(
            registry.execute("svc-A", json!({"ok": true})).await.unwrap(),
            json!({"ok": true})
        );

        let status = registry.status("svc-A").unwrap();
        assert_eq!(status.state(), CircuitState::Closed);
        assert_eq!(status.metadata.success_count, 1);
        assert_eq!(status.metadata.failure_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let transitions: Vec<(CircuitState, CircuitState)> = events
            .events_of_type("circuit-state-changed")
            .into_iter()
            .filter_map(|e| match e {
                ServiceEvent::CircuitStateChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_alert_cooldown_window() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let engine = AlertEngine::new(AlertEngineConfig::default(), notifier.clone());
        engine
            .create(
                AlertRule::new("cpu-hot", MetricPath::CpuUsage, Comparison::Above, 80.0)
                    .with_severity(Severity::High),
            )
            .unwrap();

        let t0 = Utc::now();
        let fired = engine.evaluate(&cpu_snapshot(85.0, t0), t0).await;
        assert_eq!(fired.len(), 1);

        let t2 = t0 + chrono::Duration::minutes(2);
        assert!(engine.evaluate(&cpu_snapshot(85.0, t2), t2).await.is_empty());

        let t6 = t0 + chrono::Duration::minutes(6);
        assert_eq!(engine.evaluate(&cpu_snapshot(85.0, t6), t6).await.len(), 1);

        let delivered = notifier.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|a| a.severity == Severity::High));
    }

    #[tokio::test]
    async fn test_invalid_registration_leaves_no_trace() {
        let (registry, events) = registry();
        let config = ServiceConfig::new("").with_id("ghost");

        let err = registry
            .register(config, |args| async move { Ok::<Value, BoxError>(args) })
            .await
            .unwrap_err();

        assert_matches!(err, Error::Validation(_));
        assert!(registry.is_empty());
        assert!(registry.report().is_empty());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_status_of_unknown_service() {
        let (registry, _) = registry();
        assert_matches!(
            registry.status("unknown-id"),
            Err(Error::NotFound { kind: "Service", ref id }) if id == "unknown-id"
        );
    }
}

// =============================================================================
// Circuit Breaker Properties
// =============================================================================

mod breaker_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_never_invokes_handler() {
        let (registry, _) = registry();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(
                svc_a_config(),
                switchable(Arc::new(AtomicBool::new(true)), calls.clone()),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            registry.execute("svc-A", Value::Null).await.ok();
        }
        for _ in 0..25 {
            assert_matches!(
                registry.execute("svc-A", Value::Null).await,
                Err(Error::CircuitOpen { .. })
            );
            tokio::time::advance(Duration::from_millis(30)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_restarts_timer() {
        let (registry, _) = registry();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(
                svc_a_config(),
                switchable(Arc::new(AtomicBool::new(true)), calls.clone()),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            registry.execute("svc-A", Value::Null).await.ok();
        }

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_matches!(
            registry.execute("svc-A", Value::Null).await,
            Err(Error::Underlying { .. })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.status("svc-A").unwrap().state(), CircuitState::Open);

        // Timer restarted at the failed trial
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_matches!(
            registry.execute("svc-A", Value::Null).await,
            Err(Error::CircuitOpen { .. })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_millis(500)).await;
        registry.execute("svc-A", Value::Null).await.ok();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (registry, events) = registry();
        registry
            .register(
                ServiceConfig::new("slow")
                    .with_id("slow")
                    .with_timeout(Duration::from_millis(50)),
                |args| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<Value, BoxError>(args)
                },
            )
            .await
            .unwrap();

        for _ in 0..2 {
            assert_matches!(
                registry.execute("slow", Value::Null).await,
                Err(Error::Timeout { .. })
            );
        }
        assert!(registry.status("slow").unwrap().is_open());
        assert_eq!(events.events_of_type("service-error").len(), 2);
    }

    #[tokio::test]
    async fn test_services_are_isolated() {
        let (registry, _) = registry();
        registry
            .register(
                ServiceConfig::new("bad").with_id("bad"),
                switchable(Arc::new(AtomicBool::new(true)), Arc::new(AtomicU32::new(0))),
            )
            .await
            .unwrap();
        registry
            .register(ServiceConfig::new("good").with_id("good"), |args| async move {
                Ok::<Value, BoxError>(args)
            })
            .await
            .unwrap();

        for _ in 0..3 {
            registry.execute("bad", Value::Null).await.ok();
        }
        assert!(registry.status("bad").unwrap().is_open());
        assert_eq!(registry.execute("good", json!(7)).await.unwrap(), json!(7));
        assert!(!registry.status("good").unwrap().is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_calls_on_one_service_stay_consistent() {
        let events = Arc::new(InMemoryEventCollector::new());
        let registry = Arc::new(ServiceRegistry::new(events));
        let invoked = Arc::new(AtomicU32::new(0));
        let counter = invoked.clone();

        // Breaker never trips so every call reaches the handler
        registry
            .register(
                ServiceConfig::new("flaky")
                    .with_id("flaky")
                    .with_circuit_breaker(
                        BreakerConfig::default()
                            .with_failure_threshold(1.0)
                            .with_minimum_calls(u32::MAX),
                    ),
                move |args: Value| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        if n % 2 == 0 {
                            Ok::<Value, BoxError>(args)
                        } else {
                            Err::<Value, BoxError>("odd call".into())
                        }
                    }
                },
            )
            .await
            .unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for _ in 0..125 {
                        registry.execute("flaky", Value::Null).await.ok();
                    }
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        let meta = registry.status("flaky").unwrap().metadata;
        let invoked = u64::from(invoked.load(Ordering::SeqCst));
        assert_eq!(invoked, 8000);
        assert_eq!(meta.call_count, invoked);
        assert_eq!(meta.success_count + meta.failure_count, meta.call_count);
        assert_eq!(meta.success_count, 4000);
        assert_eq!(meta.failure_count, 4000);
        assert!(meta.performance_history.len() <= 100);
    }

    #[tokio::test]
    async fn test_performance_history_bounded() {
        let (registry, _) = registry();
        registry
            .register(ServiceConfig::new("fast").with_id("fast"), |args| async move {
                Ok::<Value, BoxError>(args)
            })
            .await
            .unwrap();

        for _ in 0..150 {
            registry.execute("fast", Value::Null).await.unwrap();
        }

        let meta = registry.status("fast").unwrap().metadata;
        assert_eq!(meta.call_count, 150);
        assert_eq!(meta.performance_history.len(), 100);
    }
}

// =============================================================================
// Metrics History
// =============================================================================

mod history_tests {
    use super::*;

    #[test]
    fn test_history_bounded_and_windowed() {
        let collector = MetricsCollector::new(CollectorConfig::default(), Arc::new(IdleHost));
        let now = Utc::now();

        // One snapshot per minute over the last 25 hours
        for minute in (0..1500).rev() {
            collector.record(cpu_snapshot(10.0, now - chrono::Duration::minutes(minute)));
        }

        assert_eq!(collector.len(), 1000);

        let last_hour = collector.history_at(1.0, now);
        assert_eq!(last_hour.len(), 60);
        assert!(last_hour
            .iter()
            .all(|s| s.timestamp > now - chrono::Duration::hours(1)));

        let everything = collector.history_at(48.0, now);
        assert_eq!(everything.len(), 1000);
        assert!(everything.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}

// =============================================================================
// Context
// =============================================================================

mod context_tests {
    use super::*;

    #[tokio::test]
    async fn test_system_status_end_to_end() {
        let events = Arc::new(InMemoryEventCollector::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let overwatch = Overwatch::builder(OverwatchConfig::default())
            .publisher(events.clone())
            .notifier(notifier.clone())
            .system_sampler(Arc::new(IdleHost))
            .build()
            .unwrap();

        let id = overwatch
            .registry()
            .register(ServiceConfig::new("echo"), |args| async move {
                Ok::<Value, BoxError>(args)
            })
            .await
            .unwrap();
        overwatch.registry().execute(&id, json!("hi")).await.unwrap();

        overwatch
            .create_alert(AlertRule::new(
                "any-calls",
                MetricPath::AppTotalCalls,
                Comparison::Above,
                0.0,
            ))
            .unwrap();

        overwatch.collector().collect_once().await.unwrap();
        overwatch
            .alerts()
            .evaluate_latest(overwatch.collector())
            .await;

        let status = overwatch.system_status();
        assert_eq!(status.services.len(), 1);
        assert_eq!(status.services[&id].metadata.call_count, 1);
        assert_eq!(status.active_alerts.len(), 1);
        assert_eq!(notifier.len(), 1);
        assert_eq!(events.events_of_type("alert-fired").len(), 1);
        assert_eq!(overwatch.metrics_history(24.0).len(), 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["overall"], "healthy");
    }
}
