//! DraftKings Sportsbook Crawl
//!
//! The featured-live API is a three-level tree:
//!
//! ```text
//! featured/live
//!   └─ featuredDisplayGroups.#.displayGroupId
//!        └─ featured/displaygroups/{id}/live
//!             └─ featuredDisplayGroup.featuredSubcategories.#.subcategoryId
//!                  └─ featured/subcategories/{id}/live
//!                       └─ featuredDisplayGroups.#(featuredSubcategories.#>0)#
//! ```
//!
//! Subcategory responses repeat a header entry for every display group, even
//! groups with nothing in the queried subcategory, so the final stage keeps
//! only groups with a non-empty `featuredSubcategories` array and reshapes
//! each into a sport record.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::application::ports::CrawlSource;
use crate::domain::pipeline::{
    BuildNext, FetchRequest, Item, Pipeline, PipelineError, StageError, StageSpec, Transform,
};
use crate::infrastructure::config::SportsbookSettings;
use crate::infrastructure::query::{CompiledPath, JsonQuery, PathExtractor, QueryError};

/// Path the crawl starts from.
pub const SEED_PATH: &str = "featured/live";

const DISPLAY_GROUP_IDS: &str = "featuredDisplayGroups.#.displayGroupId";
const SUBCATEGORY_IDS: &str = "featuredDisplayGroup.featuredSubcategories.#.subcategoryId";
const POPULATED_GROUPS: &str = "
    featuredDisplayGroups
        .#(featuredSubcategories.#>0)#
";
const CATEGORIES_BY_NAME: &str = "@objectify:name";

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone)]
struct RequestFactory {
    base: String,
    prefix: String,
    user_agent: String,
}

impl RequestFactory {
    fn request(&self, path: &str) -> FetchRequest {
        let prefix = self.prefix.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        FetchRequest::get(&self.base, format!("{prefix}/{path}"))
            .with_query("format", "json")
            .with_header("User-Agent", &self.user_agent)
    }
}

/// Builds `path_template` with `{id}` replaced by the item's id.
struct IdPath {
    requests: RequestFactory,
    path_template: &'static str,
}

impl BuildNext for IdPath {
    fn build_next(&self, item: &Item) -> Result<Vec<FetchRequest>, StageError> {
        let id = id_text(item)
            .ok_or_else(|| StageError::BuildNext(format!("expected an id, found {item}")))?;
        let path = self.path_template.replace("{id}", &id);
        Ok(vec![self.requests.request(&path)])
    }
}

/// Text form of a string or numeric id.
fn id_text(item: &Item) -> Option<String> {
    match item {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Sport Shaping
// =============================================================================

/// Reshapes a display group into `{name, id, categories}` with categories
/// keyed by name.
struct SportShaper {
    by_name: CompiledPath,
}

impl Transform for SportShaper {
    fn transform(&self, item: Item) -> Result<Item, StageError> {
        let group = item
            .as_object()
            .ok_or_else(|| StageError::Transform(format!("display group is not an object: {item}")))?;

        let subcategories: Vec<Value> = group
            .get("featuredSubcategories")
            .and_then(Value::as_array)
            .map(|subs| {
                subs.iter()
                    .map(|sub| {
                        json!({
                            "name": sub.get("subcategoryName").cloned().unwrap_or(Value::Null),
                            "id": sub.get("subcategoryId").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let categories = self
            .by_name
            .select(&Value::Array(subcategories))
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(json!({
            "name": group.get("name").cloned().unwrap_or(Value::Null),
            "id": group.get("displayGroupId").cloned().unwrap_or(Value::Null),
            "categories": categories,
        }))
    }
}

// =============================================================================
// API
// =============================================================================

/// DraftKings featured-live crawl source.
#[derive(Debug, Clone)]
pub struct DraftKingsApi {
    requests: RequestFactory,
    query: Arc<JsonQuery>,
}

impl DraftKingsApi {
    /// Create the crawl source from sportsbook settings.
    #[must_use]
    pub fn new(settings: &SportsbookSettings, query: Arc<JsonQuery>) -> Self {
        Self {
            requests: RequestFactory {
                base: settings.api_base.clone(),
                prefix: settings.api_prefix.clone(),
                user_agent: settings.user_agent.clone(),
            },
            query,
        }
    }

    /// Request for an API path relative to the configured prefix.
    #[must_use]
    pub fn request(&self, path: &str) -> FetchRequest {
        self.requests.request(path)
    }

    /// Request the crawl starts from.
    #[must_use]
    pub fn seed(&self) -> FetchRequest {
        self.request(SEED_PATH)
    }

    fn extractor(&self, stage: &str, path: &str) -> Result<PathExtractor, PipelineError> {
        PathExtractor::new(&self.query, path).map_err(|e| invalid(stage, &e))
    }
}

fn invalid(stage: &str, error: &QueryError) -> PipelineError {
    PipelineError::InvalidExtractor {
        name: stage.to_string(),
        message: error.to_string(),
    }
}

impl CrawlSource for DraftKingsApi {
    fn pipeline(&self) -> Result<Pipeline, PipelineError> {
        let by_name = self
            .query
            .compile(CATEGORIES_BY_NAME)
            .map_err(|e| invalid("sports", &e))?;

        Pipeline::new(vec![
            StageSpec::new("display-groups", self.extractor("display-groups", DISPLAY_GROUP_IDS)?)
                .with_next(IdPath {
                    requests: self.requests.clone(),
                    path_template: "featured/displaygroups/{id}/live",
                }),
            StageSpec::new("subcategories", self.extractor("subcategories", SUBCATEGORY_IDS)?)
                .with_next(IdPath {
                    requests: self.requests.clone(),
                    path_template: "featured/subcategories/{id}/live",
                }),
            StageSpec::new("sports", self.extractor("sports", POPULATED_GROUPS)?)
                .with_transform(SportShaper { by_name })
                .terminal(),
        ])
    }

    fn seeds(&self) -> Vec<FetchRequest> {
        vec![self.seed()]
    }
}
