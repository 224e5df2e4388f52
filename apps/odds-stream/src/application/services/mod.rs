//! Application Services
//!
//! - `Crawler`: Runs a pipeline concurrently to exhaustion
//! - `CatalogBuilder`: Folds leaf items into the catalog
//! - `ChannelSubscription`: Per-channel socket state machine
//! - `Orchestrator`: Crawl, build, derive, subscribe

mod catalog_builder;
mod crawler;
mod keepalive;
mod orchestrator;
mod subscription;

pub use catalog_builder::CatalogBuilder;
pub use crawler::{CrawlHandle, CrawlReport, Crawler, CrawlerConfig};
pub use keepalive::{KeepaliveConfig, KeepaliveDecision, KeepaliveTracker};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use subscription::{
    ChannelSubscription, CloseReason, CompletionHandle, ConnectionPhase, SubscriptionConfig,
};
