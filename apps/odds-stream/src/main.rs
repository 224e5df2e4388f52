//! Odds Stream Binary
//!
//! Crawls the sportsbook catalog, then subscribes to one push channel per
//! discovered event group and logs every frame until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin odds-stream
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `SPORTSBOOK_API_BASE`, `SPORTSBOOK_API_PREFIX`, `SPORTSBOOK_USER_AGENT`
//! - `SPORTSBOOK_HTTP_TIMEOUT_SECS`: Per-request timeout (default: 10)
//! - `CRAWL_MAX_IN_FLIGHT`: Concurrent fetch limit, 0 = unbounded (default: 16)
//! - `PUSHER_URL`: Push endpoint (default: DraftKings EU cluster)
//! - `CHANNEL_TEMPLATE`, `CHANNEL_GRANULARITY`
//! - `KEEPALIVE_INTERVAL_SECS`, `KEEPALIVE_CHECK_MS`, `CLOSE_TIMEOUT_MS`
//! - `METRICS_PORT`: Prometheus port, 0 = disabled (default: 0)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use odds_stream::infrastructure::metrics::init_metrics;
use odds_stream::infrastructure::query::QueryExtensions;
use odds_stream::infrastructure::telemetry;
use odds_stream::{
    Catalog, Crawler, DraftKingsApi, InboundFrame, JsonQuery, OddsStreamConfig, Orchestrator,
    PusherEvent, PusherProtocol, ReqwestFetcher, WebSocketTransport,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Odds Stream");

    let config = OddsStreamConfig::from_env()?;
    log_config(&config);

    init_metrics(config.server.metrics_port)?;

    let interrupt = CancellationToken::new();
    tokio::spawn(await_shutdown(interrupt.clone()));

    let query = Arc::new(JsonQuery::new(QueryExtensions::sportsbook()));
    let source = Arc::new(DraftKingsApi::new(&config.sportsbook, query));
    let fetcher = Arc::new(ReqwestFetcher::from_settings(&config.sportsbook)?);

    let orchestrator = Orchestrator::new(
        source,
        Crawler::new(fetcher, config.crawl.crawler_config()),
        Arc::new(WebSocketTransport::new()),
        Arc::new(PusherProtocol::new()),
        config
            .stream
            .subscription_config(&config.sportsbook.user_agent),
    )
    .with_channels(
        config.stream.channel_template.clone(),
        config.stream.granularity,
    )
    .with_interrupt(interrupt.clone());

    let catalog = orchestrator.build_catalog().await?;
    log_catalog(&catalog);

    if interrupt.is_cancelled() {
        tracing::info!("Shutdown requested before subscribing");
        return Ok(());
    }

    let (frames_tx, frames_rx) = mpsc::channel(config.stream.inbound_buffer);
    let consumer = tokio::spawn(consume_frames(frames_rx));

    let handle = orchestrator.subscribe(&catalog, frames_tx)?;
    tracing::info!(subscriptions = handle.len(), "Subscriptions started");

    for (channel, reason) in handle.wait().await {
        tracing::debug!(channel = %channel, reason = reason.as_str(), "Subscription finished");
    }

    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "Frame consumer failed");
    }

    tracing::info!("Odds Stream stopped");
    Ok(())
}

/// Log every inbound frame.
async fn consume_frames(mut rx: mpsc::Receiver<InboundFrame>) {
    let mut received: u64 = 0;
    while let Some(frame) = rx.recv().await {
        received += 1;
        match PusherEvent::decode(&frame.payload) {
            Ok(event) if event.is_pong() => {
                tracing::trace!(channel = %frame.channel, "Pong");
            }
            Ok(event) if event.is_protocol() => {
                tracing::debug!(channel = %frame.channel, event = %event.event, "Protocol event");
            }
            Ok(event) => {
                tracing::info!(
                    channel = %frame.channel,
                    event = %event.event,
                    received_at = %frame.received_at,
                    payload = ?event.payload(),
                    "Channel event"
                );
            }
            Err(e) => {
                tracing::warn!(channel = %frame.channel, error = %e, raw = %frame.payload, "Undecodable frame");
            }
        }
    }
    tracing::info!(received, "Frame stream ended");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &OddsStreamConfig) {
    tracing::info!(
        api_base = %config.sportsbook.api_base,
        max_in_flight = config.crawl.max_in_flight,
        channel_template = config.stream.channel_template.as_str(),
        granularity = ?config.stream.granularity,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(pusher_url = %config.stream.pusher_url, "Push endpoint");
}

fn log_catalog(catalog: &Catalog) {
    for sport in catalog.sports() {
        tracing::info!(
            sport = %sport.name,
            id = %sport.id,
            categories = sport.categories.len(),
            "Sport"
        );
    }
    tracing::info!(
        sports = catalog.len(),
        categories = catalog.categories().count(),
        "Catalog ready"
    );
}

/// Cancel `interrupt` on SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn await_shutdown(interrupt: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    interrupt.cancel();
}
