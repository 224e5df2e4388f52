//! Crawl Source Port (Driven Port)
//!
//! A sportsbook API described as a crawl: the stages to run and the requests
//! to start from.

use crate::domain::pipeline::{FetchRequest, Pipeline, PipelineError};

/// Port supplying the pipeline and seed requests for a catalog crawl.
pub trait CrawlSource: Send + Sync {
    /// Build the validated pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the stage list is invalid.
    fn pipeline(&self) -> Result<Pipeline, PipelineError>;

    /// Requests the crawl starts from.
    fn seeds(&self) -> Vec<FetchRequest>;
}
