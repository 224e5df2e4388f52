//! Application Layer - Ports and services.
//!
//! Services here coordinate the domain through port interfaces only; the
//! concrete HTTP, WebSocket and wire-format adapters live in infrastructure.

/// Port interfaces for external systems (HTTP fetch, socket transport).
pub mod ports;

/// Crawler engine, catalog builder, subscription state machine, orchestrator.
pub mod services;
