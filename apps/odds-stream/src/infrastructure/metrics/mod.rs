//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Crawl**: Fetches by outcome, leaves emitted, undecodable leaves
//! - **Subscriptions**: Opened, closed by reason
//! - **Frames**: Frames received, keepalive pings sent
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so
//! library users and tests pay nothing when metrics are disabled.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// A port of 0 leaves metrics disabled. Calling this more than once is a
/// no-op.
///
/// # Errors
///
/// Returns an error if the exporter cannot bind or install its recorder.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if port == 0 || INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()?;

    register_metrics();
    let _ = INSTALLED.set(());
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "odds_stream_fetches_total",
        "Sportsbook API fetches by outcome"
    );
    describe_counter!(
        "odds_stream_leaves_total",
        "Leaf items emitted by the crawler"
    );
    describe_counter!(
        "odds_stream_decode_failures_total",
        "Leaf items that did not decode into a sport"
    );
    describe_counter!(
        "odds_stream_subscriptions_opened_total",
        "Channel subscriptions that completed the handshake"
    );
    describe_counter!(
        "odds_stream_subscriptions_closed_total",
        "Channel subscriptions that reached Closed, by reason"
    );
    describe_counter!(
        "odds_stream_frames_received_total",
        "Text frames received across all subscriptions"
    );
    describe_counter!(
        "odds_stream_pings_sent_total",
        "Keepalive pings queued"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a fetch outcome.
pub fn record_fetch(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("odds_stream_fetches_total", "outcome" => outcome).increment(1);
}

/// Record a leaf item delivered to the leaf stream.
pub fn record_leaf() {
    counter!("odds_stream_leaves_total").increment(1);
}

/// Record a leaf item that failed to decode.
pub fn record_decode_failure() {
    counter!("odds_stream_decode_failures_total").increment(1);
}

/// Record a subscription entering Open.
pub fn record_subscription_opened() {
    counter!("odds_stream_subscriptions_opened_total").increment(1);
}

/// Record a subscription reaching Closed.
pub fn record_subscription_closed(reason: &'static str) {
    counter!("odds_stream_subscriptions_closed_total", "reason" => reason).increment(1);
}

/// Record an inbound text frame.
pub fn record_frame_received() {
    counter!("odds_stream_frames_received_total").increment(1);
}

/// Record a keepalive ping.
pub fn record_ping_sent() {
    counter!("odds_stream_pings_sent_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
