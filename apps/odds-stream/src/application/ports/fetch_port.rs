//! Fetch Port (Driven Port)
//!
//! Interface for retrieving the raw body of an API request.

use async_trait::async_trait;

use crate::domain::pipeline::FetchRequest;

/// Fetch failure. Aborts only the crawl branch that issued the request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Request could not be sent.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Underlying error.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// Body could not be read.
    #[error("failed to read body from {url}: {message}")]
    Body {
        /// Request URL.
        url: String,
        /// Underlying error.
        message: String,
    },

    /// Request descriptor could not be turned into a request.
    #[error("invalid request {url}: {message}")]
    InvalidRequest {
        /// Request URL.
        url: String,
        /// Reason.
        message: String,
    },
}

/// Port for fetching API responses.
#[async_trait]
pub trait FetchPort: Send + Sync {
    /// Fetch the body for `request`.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;
}
