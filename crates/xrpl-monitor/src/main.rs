use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use rippled_client::{RippledClient, Transport};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xrpl_monitor::{
    alert::{AlertSink, FanoutSink, FileSink, LogSink, WebhookSink},
    collector::{CollectorContext, FastCollector, SlowCollector},
    config::{MonitorConfig, TransportMode},
    db::Database,
    metrics::Counters,
    probe::SysinfoProbe,
    routes,
    state::AppState,
    tracker::TrackerConfig,
};

/// How long collectors get to finish an in-flight tick after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn build_alert_sink(config: &MonitorConfig) -> Arc<dyn AlertSink> {
    let mut sink = FanoutSink::new().with(LogSink);
    if let Some(path) = &config.alerts_file {
        tracing::info!("Alerts appended to {}", path);
        sink = sink.with(FileSink::new(path));
    }
    if !config.webhook_urls.is_empty() {
        tracing::info!("Alert webhooks: {}", config.webhook_urls.len());
        sink = sink.with(WebhookSink::new(config.webhook_urls.clone()));
    }
    Arc::new(sink)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match MonitorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let transport = match &config.transport {
        TransportMode::Http { url } => Transport::http(url.clone(), config.upstream_timeout),
        TransportMode::Docker { container } => Transport::docker(container.clone()),
    };
    tracing::info!("Starting xrpl-monitor v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Upstream: {}", transport.describe());
    tracing::info!(
        "Cadence: fast {}s, slow {}s, retention {}h",
        config.fast_interval.as_secs(),
        config.slow_interval.as_secs(),
        config.retention.as_secs() / 3600
    );

    let db = match Database::open(&config.db_path, config.busy_timeout) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open store at {}: {}", config.db_path, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Store initialized at: {}", config.db_path);

    let counters = Arc::new(Counters::new().expect("Failed to register counters"));
    let ctx = CollectorContext::new(db.clone(), counters.clone(), build_alert_sink(&config));
    let client = Arc::new(RippledClient::new(transport, config.upstream_timeout));

    let fast = match FastCollector::new(
        client.clone(),
        ctx.clone(),
        TrackerConfig::default(),
        config.alerts.clone(),
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to restore collector state: {}", e);
            std::process::exit(1);
        }
    };
    let slow = SlowCollector::new(
        client,
        ctx,
        SysinfoProbe::new(config.rippled_data_dir.clone()),
        config.retention,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collectors = vec![
        ("fast", tokio::spawn(fast.run(config.fast_interval, shutdown_rx.clone()))),
        ("slow", tokio::spawn(slow.run(config.slow_interval, shutdown_rx))),
    ];

    let state_data = web::Data::new(AppState::new(db, counters));
    tracing::info!(
        "Exporter listening on {}:{}",
        config.exporter_host,
        config.exporter_port
    );

    // actix handles SIGINT/SIGTERM and returns once in-flight requests drain
    let served = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .configure(routes::health::configure)
    })
    .shutdown_timeout(SHUTDOWN_GRACE.as_secs())
    .bind((config.exporter_host.as_str(), config.exporter_port))?
    .run()
    .await;

    tracing::info!("Exporter stopped, stopping collectors");
    let _ = shutdown_tx.send(true);
    for (name, handle) in collectors {
        let abort = handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("{} collector task failed: {}", name, e),
            Err(_) => {
                tracing::warn!("{} collector did not stop in time, aborting", name);
                abort.abort();
            }
        }
    }

    served
}
