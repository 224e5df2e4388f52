//! Channel Derivation
//!
//! Maps a [`Catalog`] to the set of push-protocol topics to subscribe to.
//! Each category (or each line, depending on [`Granularity`]) yields one
//! [`ChannelId`] rendered from a [`ChannelTemplate`]. The result is a
//! `BTreeSet`, so it is deduplicated and its order does not depend on how
//! the catalog was built.

use std::collections::BTreeSet;
use std::fmt;

use super::catalog::{Catalog, EntityId};

/// Opaque push-protocol topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a channel id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invalid channel template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelTemplateError {
    /// The template does not embed the entity id.
    #[error("channel template {0:?} has no {{id}} placeholder")]
    MissingPlaceholder(String),
}

/// Topic-name template with an `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTemplate(String);

impl ChannelTemplate {
    /// Placeholder replaced by the entity id.
    pub const PLACEHOLDER: &'static str = "{id}";

    /// Create a template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template lacks the `{id}` placeholder.
    pub fn new(template: impl Into<String>) -> Result<Self, ChannelTemplateError> {
        let template = template.into();
        if template.contains(Self::PLACEHOLDER) {
            Ok(Self(template))
        } else {
            Err(ChannelTemplateError::MissingPlaceholder(template))
        }
    }

    /// Event-group topics (`nj_ent-eventgroup-<id>`).
    #[must_use]
    pub fn event_group() -> Self {
        Self("nj_ent-eventgroup-{id}".to_string())
    }

    /// Second-generation event-group topics (`nj_ent-eventgroupv2-<id>`).
    #[must_use]
    pub fn event_group_v2() -> Self {
        Self("nj_ent-eventgroupv2-{id}".to_string())
    }

    /// Render the channel for `id`.
    #[must_use]
    pub fn render(&self, id: &EntityId) -> ChannelId {
        ChannelId(self.0.replace(Self::PLACEHOLDER, id.as_str()))
    }

    /// Template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelTemplate {
    fn default() -> Self {
        Self::event_group()
    }
}

/// Catalog level that channels are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// One channel per category.
    #[default]
    Category,
    /// One channel per line.
    Line,
}

impl Granularity {
    /// Parse granularity from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "line" | "lines" => Self::Line,
            _ => Self::Category,
        }
    }

    /// Get the granularity name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Line => "line",
        }
    }
}

/// Derive the deduplicated channel set for `catalog`.
///
/// Entities with an empty id are skipped.
#[must_use]
pub fn derive_channels(
    catalog: &Catalog,
    template: &ChannelTemplate,
    granularity: Granularity,
) -> BTreeSet<ChannelId> {
    let ids: Box<dyn Iterator<Item = &EntityId>> = match granularity {
        Granularity::Category => Box::new(catalog.categories().map(|category| &category.id)),
        Granularity::Line => Box::new(catalog.lines().map(|line| &line.id)),
    };

    ids.filter(|id| !id.is_empty())
        .map(|id| template.render(id))
        .collect()
}
