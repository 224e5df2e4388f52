#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Odds Stream - Sportsbook Crawler and Push Subscriber
//!
//! Crawls a sportsbook's tree-shaped REST API into an in-memory catalog of
//! sports, categories and lines, then opens one Pusher WebSocket subscription
//! per discovered event group and fans every received frame into a single
//! consumer stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `pipeline`: Crawl stage descriptors and request descriptors
//!   - `catalog`: Sports catalog and its right-biased deep merge
//!   - `channel`: Channel identifiers derived from the catalog
//!
//! - **Application**: Ports and services
//!   - `ports`: Fetch, transport and channel-protocol interfaces
//!   - `services`: Crawler engine, catalog builder, subscription state
//!     machine, orchestrator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: reqwest fetch adapter
//!   - `query`: JSON path evaluator with an explicit extension table
//!   - `pusher`: Pusher wire messages and WebSocket transport
//!   - `draftkings`: The concrete sportsbook pipeline
//!   - `config`: Environment-driven settings
//!   - `metrics` / `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! seed ──► Crawler ──leaves──► CatalogBuilder ──► Catalog
//!                                                   │
//!                                          derive_channels
//!                                                   │
//!            ┌───────────── one per channel ────────┘
//!            ▼
//!   ChannelSubscription ×N ──InboundFrame──► sink (single consumer)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pipeline, catalog and channel types.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::catalog::{Catalog, CatalogError, Category, DeepMerge, EntityId, Line, Sport};
pub use domain::channel::{ChannelId, ChannelTemplate, ChannelTemplateError, Granularity, derive_channels};
pub use domain::pipeline::{
    BuildNext, Extract, FetchRequest, HttpMethod, Item, Pipeline, PipelineError, Preprocess,
    StageError, StageSpec, Transform,
};

// Ports
pub use application::ports::{
    ChannelProtocol, CloseStatus, Connection, CrawlSource, FetchError, FetchPort, InboundFrame,
    TransportError, TransportPort, WireFrame,
};

// Services
pub use application::services::{
    CatalogBuilder, ChannelSubscription, CloseReason, CompletionHandle, ConnectionPhase,
    CrawlHandle, CrawlReport, Crawler, CrawlerConfig, KeepaliveConfig, KeepaliveDecision,
    KeepaliveTracker, Orchestrator, OrchestratorError, SubscriptionConfig,
};

// Infrastructure
pub use infrastructure::config::{ConfigError, OddsStreamConfig};
pub use infrastructure::draftkings::DraftKingsApi;
pub use infrastructure::http::ReqwestFetcher;
pub use infrastructure::pusher::{PusherEvent, PusherProtocol, WebSocketTransport};
pub use infrastructure::query::{JsonQuery, PathExtractor, QueryError, QueryExtensions};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
