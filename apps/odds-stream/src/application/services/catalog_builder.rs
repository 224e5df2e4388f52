//! Catalog Builder
//!
//! Single consumer of the crawler's leaf stream. Decodes each leaf into a
//! [`Sport`] and deep-merges it into the catalog. Undecodable leaves are
//! logged and skipped; the build ends when the stream closes.

use tokio::sync::mpsc;

use crate::domain::catalog::{Catalog, Sport};
use crate::domain::pipeline::Item;
use crate::infrastructure::metrics;

/// Folds leaf items into a [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: Catalog,
    merged: usize,
    skipped: usize,
}

impl CatalogBuilder {
    /// Create a builder with an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and merge one leaf item.
    pub fn accept(&mut self, item: &Item) {
        match Sport::from_item(item) {
            Ok(sport) => {
                tracing::debug!(
                    sport = %sport.name,
                    categories = sport.categories.len(),
                    "Merging sport"
                );
                self.catalog.merge_sport(sport);
                self.merged += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable leaf");
                metrics::record_decode_failure();
                self.skipped += 1;
            }
        }
    }

    /// Drain `leaves` until the stream closes.
    pub async fn consume(mut self, mut leaves: mpsc::Receiver<Item>) -> Self {
        while let Some(item) = leaves.recv().await {
            self.accept(&item);
        }
        self
    }

    /// Leaves merged so far.
    #[must_use]
    pub const fn merged(&self) -> usize {
        self.merged
    }

    /// Leaves skipped so far.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Finish and take the catalog.
    #[must_use]
    pub fn finish(self) -> Catalog {
        self.catalog
    }
}
