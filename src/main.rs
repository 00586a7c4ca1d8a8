//! Overwatch
//!
//! Runs the monitoring loops of an [`Overwatch`] context and exposes them
//! over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Overwatch                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Metrics    │───▶│    Alert     │───▶│   Notifier   │       │
//! │  │  Collector   │    │    Engine    │    │              │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │  ┌──────────────┐    ┌──────────────────────────────────┐       │
//! │  │    Health    │    │  /healthz /readyz /status        │       │
//! │  │   Checker    │    │  /metrics                        │       │
//! │  └──────────────┘    └──────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use overwatch::adapters::{
    CompositeEventPublisher, LoggingEventPublisher, LoggingNotifier, PrometheusEventPublisher,
    SysinfoSampler,
};
use overwatch::config::parse_duration;
use overwatch::monitoring::HealthStatus;
use overwatch::{Overwatch, OverwatchConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Overwatch - circuit breakers, health checks and metric alerting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short, env = "OVERWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Health and status server bind address
    #[arg(long, env = "STATUS_ADDR", default_value = "0.0.0.0:8081")]
    status_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Override metrics.collection_interval (e.g. 30s)
    #[arg(long, env = "COLLECTION_INTERVAL")]
    collection_interval: Option<String>,

    /// Override health.check_interval
    #[arg(long, env = "CHECK_INTERVAL")]
    check_interval: Option<String>,

    /// Override alerts.evaluation_interval
    #[arg(long, env = "EVALUATION_INTERVAL")]
    evaluation_interval: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Overwatch");
    let config = load_config(&args)?;
    info!(
        "  Collection interval: {:?}",
        config.collector.collection_interval
    );
    info!("  Health check interval: {:?}", config.health.check_interval);
    info!(
        "  Alert evaluation interval: {:?}",
        config.alerts.evaluation_interval
    );

    let prometheus = Arc::new(PrometheusEventPublisher::new()?);
    let publisher = CompositeEventPublisher::new()
        .with_publisher(LoggingEventPublisher::info_level())
        .with_publisher(prometheus.clone());

    let overwatch = Arc::new(
        Overwatch::builder(config)
            .publisher(Arc::new(publisher))
            .notifier(Arc::new(LoggingNotifier::new()))
            .system_sampler(Arc::new(SysinfoSampler::new()))
            .build()
            .context("failed to build Overwatch context")?,
    );
    overwatch
        .install()
        .await
        .context("failed to install configuration")?;
    overwatch.start();

    let shutdown = CancellationToken::new();

    let status_addr: SocketAddr = args
        .status_addr
        .parse()
        .with_context(|| format!("invalid status address: {}", args.status_addr))?;
    let status_ctx = overwatch.clone();
    let status_server = tokio::spawn(serve(
        "status",
        status_addr,
        move |path| status_response(&status_ctx, path),
        shutdown.clone(),
    ));

    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address: {}", args.metrics_addr))?;
    let metrics_server = tokio::spawn(serve(
        "metrics",
        metrics_addr,
        move |path| metrics_response(&prometheus, path),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    overwatch.shutdown().await;
    for (name, server) in [("status", status_server), ("metrics", metrics_server)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} server error: {:#}", name, e),
            Err(e) => error!("{} server task failed: {}", name, e),
        }
    }

    info!("Overwatch shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<OverwatchConfig> {
    let mut config = match &args.config {
        Some(path) => OverwatchConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => OverwatchConfig::default(),
    };

    if let Some(s) = &args.collection_interval {
        config.collector.collection_interval = parse_duration(s)?;
    }
    if let Some(s) = &args.check_interval {
        config.health.check_interval = parse_duration(s)?;
    }
    if let Some(s) = &args.evaluation_interval {
        config.alerts.evaluation_interval = parse_duration(s)?;
    }
    config.validate()?;

    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP Servers
// =============================================================================

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn status_response(overwatch: &Overwatch, path: &str) -> Response<Full<Bytes>> {
    match path {
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        "/readyz" => {
            let status = overwatch.health().overall_status();
            if overwatch.is_running() && status != HealthStatus::Unhealthy {
                text(StatusCode::OK, status.to_string())
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, status.to_string())
            }
        }
        "/status" => match serde_json::to_vec(&overwatch.system_status()) {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn metrics_response(prometheus: &PrometheusEventPublisher, path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => match prometheus.encode() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn serve<F>(
    name: &'static str,
    addr: SocketAddr,
    handler: F,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    F: Fn(&str) -> Response<Full<Bytes>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} server on {}", name, addr))?;
    info!("{} server listening on {}", name, addr);

    let handler = Arc::new(handler);
    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted
                .with_context(|| format!("{} server accept error", name))?,
        };

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = handler(req.uri().path());
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} server connection error: {}", name, e);
            }
        });
    }

    Ok(())
}
