//! Health Probe Adapters
//!
//! `HealthProbe` implementations for the dependency kinds Overwatch knows
//! about: TCP endpoints, HTTP health URLs, closures, and registered services.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::config::{DependencyConfig, ProbeConfig};
use crate::domain::{HealthProbe, ProbeOutcome};
use crate::error::{Error, Result};
use crate::resilience::{CircuitState, ServiceRegistry};

/// Healthy when a TCP connection to `address` succeeds
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        TcpStream::connect(&self.address).await?;
        Ok(ProbeOutcome::Up)
    }
}

/// Healthy on a 2xx answer to `GET url`, degraded on any other status
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(ProbeOutcome::Up)
        } else if status.is_server_error() {
            Err(Error::Internal(format!("HTTP {}", status)))
        } else {
            Ok(ProbeOutcome::Degraded(format!("HTTP {}", status)))
        }
    }
}

type ProbeFn = dyn Fn() -> BoxFuture<'static, Result<ProbeOutcome>> + Send + Sync;

/// Probe backed by an async closure
pub struct FnProbe {
    f: Box<ProbeFn>,
}

impl FnProbe {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProbeOutcome>> + Send + 'static,
    {
        Self {
            f: Box::new(move || Box::pin(f())),
        }
    }
}

#[async_trait]
impl HealthProbe for FnProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        (self.f)().await
    }
}

impl std::fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProbe").finish()
    }
}

/// Maps a registered service's breaker state onto health.
///
/// Closed is up, half-open is degraded, open is unhealthy.
pub struct RegistryProbe {
    registry: Arc<ServiceRegistry>,
    service_id: String,
}

impl RegistryProbe {
    pub fn new(registry: Arc<ServiceRegistry>, service_id: impl Into<String>) -> Self {
        Self {
            registry,
            service_id: service_id.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for RegistryProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        let status = self.registry.status(&self.service_id)?;
        match status.state() {
            CircuitState::Closed => Ok(ProbeOutcome::Up),
            CircuitState::HalfOpen => Ok(ProbeOutcome::Degraded("circuit half-open".into())),
            CircuitState::Open => Err(Error::CircuitOpen {
                service_id: self.service_id.clone(),
            }),
        }
    }
}

/// Build the probe described by a configured dependency
pub fn probe_from_config(client: &reqwest::Client, dep: &DependencyConfig) -> Arc<dyn HealthProbe> {
    match &dep.probe {
        ProbeConfig::Tcp { address } => Arc::new(TcpProbe::new(address.clone())),
        ProbeConfig::Http { url } => Arc::new(HttpProbe::new(client.clone(), url.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryEventCollector;
    use crate::resilience::ServiceConfig;
    use assert_matches::assert_matches;
    use serde_json::Value;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string());
        assert_eq!(probe.probe().await.unwrap(), ProbeOutcome::Up);

        drop(listener);
        let closed = TcpProbe::new(addr.to_string());
        assert!(closed.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_fn_probe() {
        let probe = FnProbe::new(|| async { Ok(ProbeOutcome::Degraded("warming up".into())) });
        assert_eq!(
            probe.probe().await.unwrap(),
            ProbeOutcome::Degraded("warming up".into())
        );
    }

    #[tokio::test]
    async fn test_registry_probe() {
        let registry = Arc::new(ServiceRegistry::new(Arc::new(InMemoryEventCollector::new())));
        registry
            .register(ServiceConfig::new("down").with_id("down"), |_| async move {
                Err::<Value, crate::error::BoxError>("boom".into())
            })
            .await
            .unwrap();

        let probe = RegistryProbe::new(registry.clone(), "down");
        assert_eq!(probe.probe().await.unwrap(), ProbeOutcome::Up);

        for _ in 0..2 {
            registry.execute("down", Value::Null).await.ok();
        }
        assert_matches!(probe.probe().await, Err(Error::CircuitOpen { .. }));

        let missing = RegistryProbe::new(registry, "missing");
        assert_matches!(missing.probe().await, Err(Error::NotFound { .. }));
    }

    #[test]
    fn test_probe_from_config() {
        let dep = DependencyConfig {
            name: "db".into(),
            probe: ProbeConfig::Tcp {
                address: "127.0.0.1:5432".into(),
            },
            degraded_latency: None,
        };
        // Construction only; no I/O until probed
        let _probe = probe_from_config(&reqwest::Client::new(), &dep);
    }
}
