//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus process-wide concerns.

/// Environment-driven settings.
pub mod config;

/// DraftKings featured-live crawl source.
pub mod draftkings;

/// reqwest fetch adapter.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Pusher wire messages and WebSocket transport.
pub mod pusher;

/// JSON path compiler and evaluator.
pub mod query;

/// Tracing subscriber and optional OpenTelemetry export.
pub mod telemetry;
