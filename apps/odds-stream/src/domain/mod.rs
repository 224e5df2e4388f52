//! Domain Layer - Crawl pipeline, catalog and channel types.
//!
//! This layer performs no I/O. Everything here is plain data plus the
//! capability traits that pipeline stages are built from.

/// Crawl pipeline stage descriptors and request descriptors.
pub mod pipeline;

/// Sports catalog and deep-merge semantics.
pub mod catalog;

/// Channel identifiers derived from a catalog.
pub mod channel;
