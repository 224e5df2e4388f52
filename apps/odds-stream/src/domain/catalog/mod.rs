//! Sports Catalog
//!
//! In-memory model of the sportsbook hierarchy:
//! `Catalog → Sport (by name) → Category (by name) → Line (by name)`.
//!
//! # Merge semantics
//!
//! Records arriving for an existing key are deep-merged, not replaced:
//! scalar fields from the newer record overwrite the older ones, nested maps
//! are merged key by key (new keys added, colliding keys merged recursively,
//! keys absent from the newer record preserved). An empty scalar never
//! overwrites a populated one, so a sparse record cannot erase data.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Leaf item did not decode into a [`Sport`].
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// JSON shape mismatch.
    #[error("leaf item is not a sport record: {0}")]
    Decode(#[from] serde_json::Error),
}

// =============================================================================
// Entity Id
// =============================================================================

/// Sportsbook identifier. The API mixes numeric and string ids, so both
/// decode into the same canonical string form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(serde_json::Number),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

// =============================================================================
// Deep Merge
// =============================================================================

/// Right-biased deep merge.
pub trait DeepMerge {
    /// Merge `newer` into `self`, letting `newer` win on populated scalars.
    fn merge_from(&mut self, newer: Self);
}

fn merge_map<V: DeepMerge>(into: &mut BTreeMap<String, V>, newer: BTreeMap<String, V>) {
    for (key, value) in newer {
        match into.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => slot.get_mut().merge_from(value),
        }
    }
}

fn overwrite_text(into: &mut String, newer: String) {
    if !newer.is_empty() {
        *into = newer;
    }
}

fn overwrite_id(into: &mut EntityId, newer: EntityId) {
    if !newer.is_empty() {
        *into = newer;
    }
}

// =============================================================================
// Records
// =============================================================================

/// A single betting line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Sportsbook id.
    #[serde(default)]
    pub id: EntityId,
}

impl DeepMerge for Line {
    fn merge_from(&mut self, newer: Self) {
        overwrite_text(&mut self.name, newer.name);
        overwrite_id(&mut self.id, newer.id);
    }
}

/// A category (event group) within a sport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Sportsbook id.
    #[serde(default)]
    pub id: EntityId,
    /// Lines keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lines: BTreeMap<String, Line>,
}

impl DeepMerge for Category {
    fn merge_from(&mut self, newer: Self) {
        overwrite_text(&mut self.name, newer.name);
        overwrite_id(&mut self.id, newer.id);
        merge_map(&mut self.lines, newer.lines);
    }
}

/// A sport and its categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sport {
    /// Display name; the catalog key.
    pub name: String,
    /// Sportsbook id.
    #[serde(default)]
    pub id: EntityId,
    /// Categories keyed by name.
    #[serde(default)]
    pub categories: BTreeMap<String, Category>,
}

impl Sport {
    /// Decode a leaf item.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Decode`] when the item has the wrong shape.
    pub fn from_item(item: &serde_json::Value) -> Result<Self, CatalogError> {
        Ok(Self::deserialize(item)?)
    }
}

impl DeepMerge for Sport {
    fn merge_from(&mut self, newer: Self) {
        overwrite_text(&mut self.name, newer.name);
        overwrite_id(&mut self.id, newer.id);
        merge_map(&mut self.categories, newer.categories);
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Aggregate of every sport discovered during a crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    sports: BTreeMap<String, Sport>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `sport`, or deep-merge it into the existing sport of the same name.
    pub fn merge_sport(&mut self, sport: Sport) {
        match self.sports.entry(sport.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(sport);
            }
            Entry::Occupied(mut slot) => slot.get_mut().merge_from(sport),
        }
    }

    /// Look up a sport by name.
    #[must_use]
    pub fn sport(&self, name: &str) -> Option<&Sport> {
        self.sports.get(name)
    }

    /// Iterate sports in name order.
    pub fn sports(&self) -> impl Iterator<Item = &Sport> {
        self.sports.values()
    }

    /// Iterate every category of every sport.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.sports.values().flat_map(|sport| sport.categories.values())
    }

    /// Iterate every line of every category.
    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.categories().flat_map(|category| category.lines.values())
    }

    /// Number of sports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sports.len()
    }

    /// Whether no sports are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn category(name: &str, id: &str) -> Category {
        Category {
            name: name.to_string(),
            id: EntityId::new(id),
            lines: BTreeMap::new(),
        }
    }

    fn sport(name: &str, categories: &[Category]) -> Sport {
        Sport {
            name: name.to_string(),
            id: EntityId::new("1"),
            categories: categories
                .iter()
                .map(|c| (c.name.clone(), c.clone()))
                .collect(),
        }
    }

    #[test]
    fn entity_id_accepts_numbers_and_strings() {
        let numeric: EntityId = serde_json::from_value(json!(88_670_847)).unwrap();
        let text: EntityId = serde_json::from_value(json!("88670847")).unwrap();
        assert_eq!(numeric, text);
        assert_eq!(numeric.to_string(), "88670847");
    }

    #[test]
    fn decode_leaf_item() {
        let item = json!({
            "name": "Soccer",
            "id": 3,
            "categories": {
                "EPL": {"name": "EPL", "id": 40253}
            }
        });
        let sport = Sport::from_item(&item).unwrap();
        assert_eq!(sport.name, "Soccer");
        assert_eq!(sport.categories["EPL"].id.as_str(), "40253");
        assert!(sport.categories["EPL"].lines.is_empty());
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        assert!(Sport::from_item(&json!(["not", "a", "sport"])).is_err());
        assert!(Sport::from_item(&json!({"id": 1})).is_err());
    }

    #[test]
    fn merge_adds_new_categories_and_keeps_old_ones() {
        let mut catalog = Catalog::new();
        catalog.merge_sport(sport("Soccer", &[category("A", "1")]));
        catalog.merge_sport(sport("Soccer", &[category("B", "2")]));

        let soccer = catalog.sport("Soccer").unwrap();
        let names: Vec<_> = soccer.categories.keys().cloned().collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn merge_overwrites_scalars_and_merges_nested_lines() {
        let mut old = category("A", "1");
        old.lines.insert(
            "Moneyline".to_string(),
            Line {
                name: "Moneyline".to_string(),
                id: EntityId::new("10"),
            },
        );
        let mut newer = category("A", "9");
        newer.lines.insert(
            "Total".to_string(),
            Line {
                name: "Total".to_string(),
                id: EntityId::new("11"),
            },
        );

        old.merge_from(newer);
        assert_eq!(old.id.as_str(), "9");
        assert_eq!(old.lines.len(), 2);
    }

    #[test]
    fn merge_never_erases_with_empty_scalars() {
        let mut old = sport("Soccer", &[]);
        let sparse = Sport {
            name: "Soccer".to_string(),
            id: EntityId::default(),
            categories: BTreeMap::new(),
        };
        old.merge_from(sparse);
        assert_eq!(old.id.as_str(), "1");
    }

    #[test]
    fn iterators_walk_the_hierarchy() {
        let mut catalog = Catalog::new();
        let mut with_line = category("B", "2");
        with_line.lines.insert("L".to_string(), Line::default());
        catalog.merge_sport(sport("Soccer", &[category("A", "1")]));
        catalog.merge_sport(sport("Tennis", &[with_line]));

        assert_eq!(catalog.sports().count(), 2);
        assert_eq!(catalog.categories().count(), 2);
        assert_eq!(catalog.lines().count(), 1);
    }

    fn arb_sport() -> impl Strategy<Value = Sport> {
        let names = prop::sample::select(vec!["Soccer", "Tennis", "Golf"]);
        let categories = prop::collection::vec(
            (
                prop::sample::select(vec!["A", "B", "C", "D"]),
                prop::collection::vec(prop::sample::select(vec!["ML", "Spread", "Total"]), 0..3),
            ),
            0..4,
        );
        (names, categories).prop_map(|(name, categories)| Sport {
            name: name.to_string(),
            id: EntityId::new(format!("{name}-id")),
            categories: categories
                .into_iter()
                .map(|(cat, lines)| {
                    let lines = lines
                        .into_iter()
                        .map(|line| {
                            (
                                line.to_string(),
                                Line {
                                    name: line.to_string(),
                                    id: EntityId::new(format!("{cat}-{line}")),
                                },
                            )
                        })
                        .collect();
                    (
                        cat.to_string(),
                        Category {
                            name: cat.to_string(),
                            id: EntityId::new(format!("{name}-{cat}")),
                            lines,
                        },
                    )
                })
                .collect(),
        })
    }

    proptest! {
        #[test]
        fn merge_is_order_independent(
            (sports, shuffled) in prop::collection::vec(arb_sport(), 0..8)
                .prop_flat_map(|sports| {
                    let shuffled = Just(sports.clone()).prop_shuffle();
                    (Just(sports), shuffled)
                })
        ) {
            let mut forward = Catalog::new();
            for s in sports {
                forward.merge_sport(s);
            }
            let mut permuted = Catalog::new();
            for s in shuffled {
                permuted.merge_sport(s);
            }
            prop_assert_eq!(forward, permuted);
        }
    }
}
