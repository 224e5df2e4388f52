//! Crawl Pipelines
//!
//! A [`Pipeline`] is an ordered, immutable list of [`StageSpec`]s. Stage `n`
//! extracts items from the response to a request issued for depth `n`; a
//! non-final stage turns every item into further requests for stage `n + 1`,
//! the final stage hands its items to the caller as leaves.
//!
//! Stage hooks are capability traits ([`Extract`], [`Transform`],
//! [`BuildNext`], [`Preprocess`]) so stages stay composable and each hook can
//! be tested on its own. Closures with the right signature implement the
//! hook traits directly.
//!
//! Pipelines are validated once in [`Pipeline::new`]. A non-final stage with
//! no request builder is rejected there, before any request is issued.

use std::fmt;
use std::sync::Arc;

/// An opaque structured value flowing between stages.
pub type Item = serde_json::Value;

// =============================================================================
// Request Descriptor
// =============================================================================

/// HTTP method of a [`FetchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    /// GET request.
    #[default]
    Get,
    /// POST request.
    Post,
}

impl HttpMethod {
    /// Get the method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Transport-agnostic description of one API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Scheme and host, e.g. `https://sportsbook.example.com`.
    pub base_url: String,
    /// Absolute path, e.g. `/api/v4/featured/live`.
    pub path: String,
    /// Query parameters, unencoded.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Create a GET request.
    #[must_use]
    pub fn get(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            base_url: base_url.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Create a POST request with no body.
    #[must_use]
    pub fn post(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            ..Self::get(base_url, path)
        }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Base URL joined with the path, without the query string.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.url())?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Stage Hooks
// =============================================================================

/// Per-item stage failure. Never fatal to the crawl.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    /// Response preprocessing failed.
    #[error("response preprocessing failed: {0}")]
    Preprocess(String),

    /// Extractor could not evaluate against the response.
    #[error("extraction failed: {0}")]
    Extract(String),

    /// Item transform failed.
    #[error("item transform failed: {0}")]
    Transform(String),

    /// Building the next requests for an item failed.
    #[error("next request build failed: {0}")]
    BuildNext(String),
}

/// Finds the items of interest in a raw response body.
pub trait Extract: Send + Sync {
    /// Extract zero or more items from `body`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Extract`] when the body cannot be queried.
    fn extract(&self, body: &[u8]) -> Result<Vec<Item>, StageError>;
}

/// Reshapes one extracted item.
pub trait Transform: Send + Sync {
    /// Transform `item`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Transform`] when the item has the wrong shape.
    fn transform(&self, item: Item) -> Result<Item, StageError>;
}

/// Turns one item into the requests for the next stage.
pub trait BuildNext: Send + Sync {
    /// Build zero or more follow-up requests for `item`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::BuildNext`] when no request can be formed.
    fn build_next(&self, item: &Item) -> Result<Vec<FetchRequest>, StageError>;
}

/// Rewrites a raw response body before extraction.
pub trait Preprocess: Send + Sync {
    /// Preprocess `body`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Preprocess`] on failure.
    fn preprocess(&self, body: Vec<u8>) -> Result<Vec<u8>, StageError>;
}

impl<F> Transform for F
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    fn transform(&self, item: Item) -> Result<Item, StageError> {
        self(item)
    }
}

impl<F> BuildNext for F
where
    F: Fn(&Item) -> Result<Vec<FetchRequest>, StageError> + Send + Sync,
{
    fn build_next(&self, item: &Item) -> Result<Vec<FetchRequest>, StageError> {
        self(item)
    }
}

impl<F> Preprocess for F
where
    F: Fn(Vec<u8>) -> Result<Vec<u8>, StageError> + Send + Sync,
{
    fn preprocess(&self, body: Vec<u8>) -> Result<Vec<u8>, StageError> {
        self(body)
    }
}

// =============================================================================
// Stage Spec
// =============================================================================

/// One stage of a crawl pipeline.
#[derive(Clone)]
pub struct StageSpec {
    name: String,
    extractor: Arc<dyn Extract>,
    preprocessor: Option<Arc<dyn Preprocess>>,
    transform: Option<Arc<dyn Transform>>,
    next: Option<Arc<dyn BuildNext>>,
    terminal: bool,
}

impl StageSpec {
    /// Create a stage with only an extractor.
    pub fn new(name: impl Into<String>, extractor: impl Extract + 'static) -> Self {
        Self {
            name: name.into(),
            extractor: Arc::new(extractor),
            preprocessor: None,
            transform: None,
            next: None,
            terminal: false,
        }
    }

    /// Set the response preprocessor.
    #[must_use]
    pub fn with_preprocessor(mut self, preprocessor: impl Preprocess + 'static) -> Self {
        self.preprocessor = Some(Arc::new(preprocessor));
        self
    }

    /// Set the item transform.
    #[must_use]
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Set the next-request builder.
    #[must_use]
    pub fn with_next(mut self, next: impl BuildNext + 'static) -> Self {
        self.next = Some(Arc::new(next));
        self
    }

    /// Mark this stage as final: its items are emitted as leaves.
    #[must_use]
    pub const fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Stage name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the preprocessor, if any.
    ///
    /// # Errors
    ///
    /// Propagates the preprocessor's error.
    pub fn preprocess(&self, body: Vec<u8>) -> Result<Vec<u8>, StageError> {
        match &self.preprocessor {
            Some(preprocessor) => preprocessor.preprocess(body),
            None => Ok(body),
        }
    }

    /// Run the extractor.
    ///
    /// # Errors
    ///
    /// Propagates the extractor's error.
    pub fn extract(&self, body: &[u8]) -> Result<Vec<Item>, StageError> {
        self.extractor.extract(body)
    }

    /// Run the transform, if any.
    ///
    /// # Errors
    ///
    /// Propagates the transform's error.
    pub fn transform(&self, item: Item) -> Result<Item, StageError> {
        match &self.transform {
            Some(transform) => transform.transform(item),
            None => Ok(item),
        }
    }

    /// Build the follow-up requests for `item`.
    ///
    /// # Errors
    ///
    /// Propagates the builder's error. A stage without a builder yields
    /// no requests; [`Pipeline::new`] guarantees that never happens for a
    /// non-final stage.
    pub fn build_next(&self, item: &Item) -> Result<Vec<FetchRequest>, StageError> {
        match &self.next {
            Some(next) => next.build_next(item),
            None => Ok(Vec::new()),
        }
    }

    /// Whether a request builder is configured.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("preprocessor", &self.preprocessor.is_some())
            .field("transform", &self.transform.is_some())
            .field("next", &self.next.is_some())
            .field("terminal", &self.terminal)
            .finish()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Pipeline construction defect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// No stages.
    #[error("pipeline has no stages")]
    Empty,

    /// A non-final stage has no next-request builder.
    #[error("stage {index} ({name}) is not final yet has no next-request builder")]
    MissingNextRequest {
        /// Stage index.
        index: usize,
        /// Stage name.
        name: String,
    },

    /// A stage follows a stage explicitly marked final.
    #[error("stage {index} ({name}) follows a final stage and can never run")]
    UnreachableStage {
        /// Stage index.
        index: usize,
        /// Stage name.
        name: String,
    },

    /// An extractor expression failed to compile.
    #[error("stage {name} has an invalid extractor: {message}")]
    InvalidExtractor {
        /// Stage name.
        name: String,
        /// Compiler message.
        message: String,
    },
}

/// Validated, immutable, cheaply cloneable list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Arc<[StageSpec]>,
    final_index: usize,
}

impl Pipeline {
    /// Validate and build a pipeline.
    ///
    /// The last stage is implicitly final. A stage marked with
    /// [`StageSpec::terminal`] must be the last one.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] describing the first defect found.
    pub fn new(stages: Vec<StageSpec>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }

        let final_index = stages.len() - 1;
        for (index, stage) in stages.iter().enumerate() {
            if index == final_index {
                break;
            }
            if stage.terminal {
                let next = &stages[index + 1];
                return Err(PipelineError::UnreachableStage {
                    index: index + 1,
                    name: next.name.clone(),
                });
            }
            if !stage.has_next() {
                return Err(PipelineError::MissingNextRequest {
                    index,
                    name: stage.name.clone(),
                });
            }
        }

        Ok(Self {
            stages: stages.into(),
            final_index,
        })
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false: validation rejects empty pipelines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage at `index`.
    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&StageSpec> {
        self.stages.get(index)
    }

    /// Whether items of stage `index` are leaves.
    #[must_use]
    pub const fn is_final(&self, index: usize) -> bool {
        index >= self.final_index
    }
}
