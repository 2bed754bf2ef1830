//! Queue Mediator
//!
//! Consumes subscription queues from RabbitMQ and forwards each message to
//! its configured HTTP or ESB target. Failed forwards land in
//! `<queue>_FAILED`. Provides a REST API for publishing, request status,
//! queue inspection, health and metrics.
//!
//! ## Features
//!
//! - **Config re-sync**: when `resyncIntervalSeconds` is set, the config file
//!   is reloaded periodically and consumers are re-registered. Unchanged
//!   bindings are left alone.
//! - **Graceful shutdown**: Ctrl+C / SIGTERM cancels every consumer, then
//!   closes the broker connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use qm_api::{create_router, AppState};
use qm_broker::amqp::redact_credentials;
use qm_broker::{AmqpConnector, BrokerConnectionManager, Publisher};
use qm_config::MediatorConfig;
use qm_relay::{
    build_http_client, ConsumerRegistry, EsbClient, FailureRouter, HttpEsbClient, MessageForwarder,
    PublishService, RequestTracker, SharedConfig,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Queue Mediator
#[derive(Parser, Debug)]
#[command(name = "qm-mediator")]
#[command(about = "Relays broker messages to HTTP and ESB endpoints and tracks their outcome")]
struct Args {
    /// Configuration file (.json or .toml)
    #[arg(long, env = "QM_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, env = "QM_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_format);

    info!("Starting Queue Mediator");

    let config = load_config(args.config.as_deref())?;
    let metrics = install_metrics();

    // 1. Shared broker connection; the process does not serve without it
    let durable = config.queue_server.durable_queues;
    let broker = Arc::new(BrokerConnectionManager::new(Arc::new(AmqpConnector::new(durable))));
    let broker_uri = config.queue_server.amqp_uri();
    broker
        .init(&broker_uri)
        .await
        .with_context(|| format!("Failed to connect to broker at {}", redact_credentials(&broker_uri)))?;

    // 2. Relay pipeline
    let tracker = Arc::new(RequestTracker::new(config.tracker.max_records));
    let failures = Arc::new(FailureRouter::new(broker.clone()));
    let timeout = Duration::from_secs(config.forwarder.timeout_seconds);

    if !config.esb.is_configured() {
        warn!("ESB connector is not fully configured, govesb: targets will be dead-lettered");
    }
    let esb: Arc<dyn EsbClient> = Arc::new(HttpEsbClient::new(config.esb.clone(), build_http_client(timeout)?));

    let forwarder = Arc::new(MessageForwarder::new(tracker.clone(), failures, esb, timeout)?);
    let registry = Arc::new(ConsumerRegistry::new(broker.clone(), tracker.clone(), forwarder));

    // 3. Consumers and publish queues
    let bound = registry.register_all(&config.sub_queues).await;
    info!(consumers = bound, "Subscription queues registered");
    precreate_publish_queues(&broker, &config.pub_queues).await;

    let http_port = config.http.port;
    let resync_interval = config.resync_interval_seconds.filter(|s| *s > 0);
    let shared_config: SharedConfig = Arc::new(RwLock::new(config));

    // 4. Config re-sync
    let resync_task = match (args.config.clone(), resync_interval) {
        (Some(path), Some(secs)) => {
            info!(path = %path.display(), interval_secs = secs, "Config re-sync enabled");
            Some(tokio::spawn(resync_loop(
                path,
                Duration::from_secs(secs),
                shared_config.clone(),
                registry.clone(),
                broker.clone(),
            )))
        }
        _ => None,
    };

    // 5. HTTP API
    let publish = Arc::new(PublishService::new(
        shared_config.clone(),
        Publisher::new(Arc::new(AmqpConnector::new(durable))),
        tracker.clone(),
    ));
    let app = create_router(AppState {
        publish,
        tracker,
        broker: broker.clone(),
        metrics,
    });

    let listener = TcpListener::bind(("0.0.0.0", http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", http_port))?;
    info!(port = http_port, "Queue Mediator started. Press Ctrl+C to shutdown.");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "HTTP server error");
    }

    info!("Shutdown signal received...");

    if let Some(task) = resync_task {
        task.abort();
    }
    registry.shutdown().await;
    broker.close().await;

    info!("Queue Mediator shutdown complete");
    Ok(())
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> Result<MediatorConfig> {
    match path {
        Some(path) => MediatorConfig::load_with_env(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            warn!("No configuration file given, using defaults and environment");
            let mut config = MediatorConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, /metrics disabled");
            None
        }
    }
}

async fn precreate_publish_queues(broker: &BrokerConnectionManager, pub_queues: &[String]) {
    let channel = match broker.get_channel() {
        Ok(channel) => channel,
        Err(e) => {
            error!(error = %e, "Cannot create publish queues");
            return;
        }
    };

    for queue in pub_queues {
        match channel.assert_queue(queue).await {
            Ok(()) => info!(queue = %queue, "Publish queue ready"),
            Err(e) => error!(queue = %queue, error = %e, "Failed to create publish queue"),
        }
    }
}

async fn resync_loop(
    path: PathBuf,
    interval: Duration,
    shared_config: SharedConfig,
    registry: Arc<ConsumerRegistry>,
    broker: Arc<BrokerConnectionManager>,
) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately; startup already registered everything
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let config = match MediatorConfig::load_with_env(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config re-sync failed, keeping current configuration");
                continue;
            }
        };

        let bound = registry.register_all(&config.sub_queues).await;
        precreate_publish_queues(&broker, &config.pub_queues).await;
        info!(consumers = bound, "Configuration re-synced");

        *shared_config.write() = config;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
