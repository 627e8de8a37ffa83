//! Content Catalog
//!
//! Read-only snapshot of items and their declared associations, plus the
//! per-session filtered view the assignment engine draws from.
//!
//! ## Module Structure
//!
//! - `item`: Item, Association, kinds and tags
//! - `filter`: Grade/theme filter configuration
//! - `index`: Global (unfiltered) association lookup
//! - `normalize`: Content normalization

pub mod item;
pub mod filter;
pub mod index;
pub mod normalize;

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::hash::StateHasher;

pub use item::{
    Association, AssociationId, CatalogPayload, Item, ItemId, ItemKind, PairKind, Tags,
};
pub use filter::{FilterConfig, ThemeMatchMode};
pub use index::{AssociationIndex, ContentRef};
pub use normalize::{image_label, normalize_content};

/// Catalog construction errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Two items share an id.
    #[error("duplicate item id {0}")]
    DuplicateItem(ItemId),

    /// Two associations share an id.
    #[error("duplicate association id {0}")]
    DuplicateAssociation(AssociationId),

    /// Payload could not be parsed.
    #[error("invalid catalog payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable catalog snapshot.
///
/// Items are keyed by id and associations are sorted by id, so every
/// derived candidate list is already in a platform-independent order.
#[derive(Clone, Debug)]
pub struct Catalog {
    items: BTreeMap<ItemId, Item>,
    associations: Vec<Association>,
    index: AssociationIndex,
    version: String,
}

impl Catalog {
    /// Build a snapshot from a raw payload.
    ///
    /// Associations that reference unknown items or pair incompatible kinds
    /// are dropped. Kept associations are oriented so `left` is the
    /// phrase/expression side.
    pub fn from_payload(payload: CatalogPayload) -> Result<Self, CatalogError> {
        let mut items = BTreeMap::new();
        for item in payload.items {
            let id = item.id;
            if items.insert(id, item).is_some() {
                return Err(CatalogError::DuplicateItem(id));
            }
        }

        let mut by_id: BTreeMap<AssociationId, Association> = BTreeMap::new();
        for mut assoc in payload.associations {
            let (Some(left), Some(right)) = (
                items.get(&assoc.left_item_id),
                items.get(&assoc.right_item_id),
            ) else {
                warn!("Dropping {}: references a missing item", assoc.id);
                continue;
            };
            if !left.kind.compatible_with(right.kind) {
                warn!(
                    "Dropping {}: {:?} cannot pair with {:?}",
                    assoc.id, left.kind, right.kind
                );
                continue;
            }
            if !left.kind.is_left() {
                std::mem::swap(&mut assoc.left_item_id, &mut assoc.right_item_id);
            }
            let id = assoc.id;
            if by_id.insert(id, assoc).is_some() {
                return Err(CatalogError::DuplicateAssociation(id));
            }
        }
        let associations: Vec<Association> = by_id.into_values().collect();

        let index = AssociationIndex::build(&associations, |id| items.get(&id));
        let version = compute_version(&items, &associations);

        debug!(
            "Catalog {} loaded: {} items, {} associations",
            &version[..12],
            items.len(),
            associations.len()
        );

        Ok(Self {
            items,
            associations,
            index,
            version,
        })
    }

    /// Parse and build from a JSON payload.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let payload: CatalogPayload = serde_json::from_str(json)?;
        Self::from_payload(payload)
    }

    /// Empty catalog.
    pub fn empty() -> Self {
        let items = BTreeMap::new();
        let version = compute_version(&items, &[]);
        Self {
            items,
            associations: Vec::new(),
            index: AssociationIndex::default(),
            version,
        }
    }

    /// Look up an item.
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    /// All items, sorted by id.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// All kept associations, sorted by id.
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Global association index (unfiltered).
    pub fn index(&self) -> &AssociationIndex {
        &self.index
    }

    /// Hex fingerprint of this snapshot.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Pair kind of an association.
    pub fn pair_kind_of(&self, assoc: &Association) -> Option<PairKind> {
        self.item(assoc.left_item_id).map(|i| i.kind.pair_kind())
    }

    /// Export the snapshot as a payload.
    pub fn to_payload(&self) -> CatalogPayload {
        CatalogPayload {
            items: self.items.values().cloned().collect(),
            associations: self.associations.clone(),
        }
    }

    /// Apply a session filter (`filterCatalog`).
    pub fn filter(&self, config: &FilterConfig) -> FilteredCatalog<'_> {
        let passing: BTreeMap<ItemId, &Item> = self
            .items
            .values()
            .filter(|item| config.passes(&item.tags))
            .map(|item| (item.id, item))
            .collect();

        let mut active = passing.clone();
        let mut associations: [Vec<&Association>; 2] = [Vec::new(), Vec::new()];

        for assoc in &self.associations {
            let survives = if assoc.tags.is_empty() {
                passing.contains_key(&assoc.left_item_id)
                    && passing.contains_key(&assoc.right_item_id)
            } else {
                config.passes(&assoc.tags)
            };
            if !survives {
                continue;
            }
            let (Some(left), Some(right)) = (
                self.items.get(&assoc.left_item_id),
                self.items.get(&assoc.right_item_id),
            ) else {
                continue;
            };
            // Items of a surviving association are part of the active set.
            active.insert(left.id, left);
            active.insert(right.id, right);
            associations[left.kind.pair_kind().index()].push(assoc);
        }

        let mut items: [Vec<&Item>; 4] = [Vec::new(), Vec::new(), Vec::new(), Vec::new()];
        for item in active.into_values() {
            items[item.kind.index()].push(item);
        }

        FilteredCatalog {
            catalog: self,
            items,
            associations,
        }
    }

    /// View with no filter applied.
    pub fn unfiltered(&self) -> FilteredCatalog<'_> {
        self.filter(&FilterConfig::default())
    }
}

/// Hex SHA-256 over the canonical JSON encoding of the snapshot.
fn compute_version(items: &BTreeMap<ItemId, Item>, associations: &[Association]) -> String {
    let mut hasher = StateHasher::for_catalog();
    for item in items.values() {
        hasher.update_bytes(&serde_json::to_vec(item).unwrap_or_default());
    }
    for assoc in associations {
        hasher.update_bytes(&serde_json::to_vec(assoc).unwrap_or_default());
    }
    hex::encode(hasher.finalize())
}

/// Filtered, read-only view of a catalog.
///
/// All lists are sorted by id.
#[derive(Clone, Debug)]
pub struct FilteredCatalog<'a> {
    catalog: &'a Catalog,
    items: [Vec<&'a Item>; 4],
    associations: [Vec<&'a Association>; 2],
}

impl<'a> FilteredCatalog<'a> {
    /// The full, unfiltered catalog (for the global association index).
    pub fn global(&self) -> &'a Catalog {
        self.catalog
    }

    /// Active items of a kind.
    pub fn items_of(&self, kind: ItemKind) -> &[&'a Item] {
        &self.items[kind.index()]
    }

    /// Surviving associations of a pair kind.
    pub fn associations_of(&self, kind: PairKind) -> &[&'a Association] {
        &self.associations[kind.index()]
    }

    /// Whether an item is in the active set.
    pub fn contains_item(&self, id: ItemId) -> bool {
        self.catalog
            .item(id)
            .map(|item| self.items_of(item.kind).binary_search_by_key(&id, |i| i.id).is_ok())
            .unwrap_or(false)
    }

    /// Total active items.
    pub fn item_count(&self) -> usize {
        self.items.iter().map(Vec::len).sum()
    }

    /// Total surviving associations.
    pub fn association_count(&self) -> usize {
        self.associations.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Shared fixture: animals (grade 1) and space (grade 3) phrase/image
    /// pairs, plus arithmetic pairs with no themes.
    pub(crate) fn sample_catalog() -> Catalog {
        let animals = Tags::default().with_grade(1).with_theme("animals");
        let space = Tags::default().with_grade(3).with_theme("space");

        let items = vec![
            Item::new(1, ItemKind::Phrase, "Cat").with_tags(animals.clone()),
            Item::new(2, ItemKind::Image, "img/cat.png").with_tags(animals.clone()),
            Item::new(3, ItemKind::Phrase, "Dog").with_tags(animals.clone()),
            Item::new(4, ItemKind::Image, "img/dog.png").with_tags(animals.clone()),
            Item::new(5, ItemKind::Phrase, "Rocket").with_tags(space.clone()),
            Item::new(6, ItemKind::Image, "img/rocket.png").with_tags(space.clone()),
            Item::new(7, ItemKind::Phrase, "Moon").with_tags(space.clone()),
            Item::new(8, ItemKind::Image, "img/moon.png").with_tags(space),
            Item::new(20, ItemKind::Expression, "3 + 4"),
            Item::new(21, ItemKind::NumericResult, "7"),
            Item::new(22, ItemKind::Expression, "2 × 6"),
            Item::new(23, ItemKind::NumericResult, "12"),
            Item::new(24, ItemKind::NumericResult, "9"),
        ];
        let associations = vec![
            Association::new(100, 1, 2),
            Association::new(101, 4, 3), // reversed on purpose
            Association::new(102, 5, 6),
            Association::new(103, 7, 8),
            Association::new(110, 20, 21),
            Association::new(111, 22, 23),
        ];
        Catalog::from_payload(CatalogPayload { items, associations }).unwrap()
    }

    #[test]
    fn test_orients_and_sorts_associations() {
        let catalog = sample_catalog();
        let dog = catalog
            .associations()
            .iter()
            .find(|a| a.id == AssociationId(101))
            .unwrap();
        assert_eq!(dog.left_item_id, ItemId(3));
        assert_eq!(dog.right_item_id, ItemId(4));

        let ids: Vec<u64> = catalog.associations().iter().map(|a| a.id.0).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_drops_invalid_associations() {
        let payload = CatalogPayload {
            items: vec![
                Item::new(1, ItemKind::Phrase, "a"),
                Item::new(2, ItemKind::Expression, "1 + 1"),
            ],
            associations: vec![Association::new(1, 1, 2), Association::new(2, 1, 99)],
        };
        let catalog = Catalog::from_payload(payload).unwrap();
        assert!(catalog.associations().is_empty());
        assert!(catalog.index().is_empty());
    }

    #[test]
    fn test_duplicate_item_rejected() {
        let payload = CatalogPayload {
            items: vec![Item::new(1, ItemKind::Phrase, "a"), Item::new(1, ItemKind::Image, "b")],
            associations: vec![],
        };
        assert!(matches!(
            Catalog::from_payload(payload),
            Err(CatalogError::DuplicateItem(ItemId(1)))
        ));
    }

    #[test]
    fn test_version_is_stable() {
        let a = sample_catalog();
        let b = sample_catalog();
        assert_eq!(a.version(), b.version());
        assert_eq!(a.version().len(), 64);
        assert_ne!(a.version(), Catalog::empty().version());
    }

    #[test]
    fn test_theme_filter_keeps_matching_pairs() {
        let catalog = sample_catalog();
        let filtered = catalog.filter(&FilterConfig::default().with_theme("animals"));

        assert_eq!(filtered.associations_of(PairKind::PhraseImage).len(), 2);
        // Untagged arithmetic items fail an active theme filter.
        assert!(filtered.associations_of(PairKind::ExpressionNumeric).is_empty());
        assert!(filtered.items_of(ItemKind::Expression).is_empty());
        assert!(filtered.contains_item(ItemId(1)));
        assert!(!filtered.contains_item(ItemId(5)));
    }

    #[test]
    fn test_include_untagged_admits_arithmetic() {
        let catalog = sample_catalog();
        let filtered = catalog.filter(&FilterConfig::default().with_theme("animals").including_untagged());
        assert_eq!(filtered.associations_of(PairKind::ExpressionNumeric).len(), 2);
        assert_eq!(filtered.items_of(ItemKind::NumericResult).len(), 3);
    }

    #[test]
    fn test_grade_filter() {
        let catalog = sample_catalog();
        let filtered = catalog.filter(&FilterConfig::default().with_grade(3));
        let phrases: Vec<u64> = filtered
            .items_of(ItemKind::Phrase)
            .iter()
            .map(|i| i.id.0)
            .collect();
        assert_eq!(phrases, vec![5, 7]);
        // Ungraded arithmetic passes the grade rule.
        assert_eq!(filtered.associations_of(PairKind::ExpressionNumeric).len(), 2);
    }

    #[test]
    fn test_tagged_association_filtered_directly() {
        let payload = CatalogPayload {
            items: vec![
                Item::new(1, ItemKind::Phrase, "Sun").with_tags(Tags::default().with_theme("weather")),
                Item::new(2, ItemKind::Image, "sun.png").with_tags(Tags::default().with_theme("weather")),
            ],
            associations: vec![
                Association::new(1, 1, 2).with_tags(Tags::default().with_theme("space")),
            ],
        };
        let catalog = Catalog::from_payload(payload).unwrap();
        let filtered = catalog.filter(&FilterConfig::default().with_theme("space"));

        // The association's own tag matches even though its items do not,
        // and its items join the active set.
        assert_eq!(filtered.associations_of(PairKind::PhraseImage).len(), 1);
        assert!(filtered.contains_item(ItemId(1)));
        assert!(filtered.contains_item(ItemId(2)));
    }

    #[test]
    fn test_from_json() {
        let catalog = Catalog::from_json(
            r#"{"items":[{"id":1,"kind":"expression","content":"1 + 1"},{"id":2,"kind":"numericResult","content":"2"}],
                "associations":[{"id":9,"leftId":2,"rightId":1}]}"#,
        )
        .unwrap();
        assert_eq!(catalog.associations()[0].left_item_id, ItemId(1));
        assert!(Catalog::from_json("not json").is_err());
    }
}
