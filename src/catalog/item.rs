//! Catalog Item Definitions
//!
//! Items and associations as delivered by the content collaborator.
//! Ids implement Ord so every candidate list can be pre-sorted.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Catalog item identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Association identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociationId(pub u64);

impl fmt::Display for AssociationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assoc#{}", self.0)
    }
}

// =============================================================================
// KINDS
// =============================================================================

/// What an item (and the zone showing it) displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ItemKind {
    /// Free text.
    Phrase = 0,
    /// Image reference (URL or asset path).
    Image = 1,
    /// Arithmetic expression, e.g. `3 × 4`.
    Expression = 2,
    /// Numeric answer, e.g. `12`.
    NumericResult = 3,
}

impl ItemKind {
    /// All kinds in canonical order.
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Phrase,
        ItemKind::Image,
        ItemKind::Expression,
        ItemKind::NumericResult,
    ];

    /// Index into per-kind tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The kind this one pairs with.
    pub fn complement(self) -> ItemKind {
        match self {
            ItemKind::Phrase => ItemKind::Image,
            ItemKind::Image => ItemKind::Phrase,
            ItemKind::Expression => ItemKind::NumericResult,
            ItemKind::NumericResult => ItemKind::Expression,
        }
    }

    /// The pair kind this item kind belongs to.
    pub fn pair_kind(self) -> PairKind {
        match self {
            ItemKind::Phrase | ItemKind::Image => PairKind::PhraseImage,
            ItemKind::Expression | ItemKind::NumericResult => PairKind::ExpressionNumeric,
        }
    }

    /// Whether this kind sits on the left side of its pair kind.
    #[inline]
    pub fn is_left(self) -> bool {
        matches!(self, ItemKind::Phrase | ItemKind::Expression)
    }

    /// Whether two kinds can form an association.
    #[inline]
    pub fn compatible_with(self, other: ItemKind) -> bool {
        self.complement() == other
    }
}

/// A kind of correct pair a round can be built around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum PairKind {
    /// phrase ↔ image
    PhraseImage = 0,
    /// expression ↔ numericResult
    ExpressionNumeric = 1,
}

impl PairKind {
    /// Pair kinds in the fixed selection order.
    pub const ALL: [PairKind; 2] = [PairKind::PhraseImage, PairKind::ExpressionNumeric];

    /// Index into per-pair-kind tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Left-side item kind.
    pub fn left(self) -> ItemKind {
        match self {
            PairKind::PhraseImage => ItemKind::Phrase,
            PairKind::ExpressionNumeric => ItemKind::Expression,
        }
    }

    /// Right-side item kind.
    pub fn right(self) -> ItemKind {
        self.left().complement()
    }
}

// =============================================================================
// TAGS
// =============================================================================

/// Classification tags used by session filters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tags {
    /// Grade level, if the item is graded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<u8>,
    /// Topic themes.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub themes: BTreeSet<String>,
}

impl Tags {
    /// Tags with neither a grade nor themes.
    pub fn is_empty(&self) -> bool {
        self.grade_level.is_none() && self.themes.is_empty()
    }

    /// Builder: set grade.
    pub fn with_grade(mut self, grade: u8) -> Self {
        self.grade_level = Some(grade);
        self
    }

    /// Builder: add a theme.
    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.themes.insert(theme.into());
        self
    }
}

// =============================================================================
// ITEMS & ASSOCIATIONS
// =============================================================================

/// A piece of displayable content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique id.
    pub id: ItemId,
    /// Content kind.
    pub kind: ItemKind,
    /// Text, image URL, expression or number.
    pub content: String,
    /// Filter tags.
    #[serde(flatten)]
    pub tags: Tags,
}

impl Item {
    /// Create an untagged item.
    pub fn new(id: u64, kind: ItemKind, content: impl Into<String>) -> Self {
        Self {
            id: ItemId(id),
            kind,
            content: content.into(),
            tags: Tags::default(),
        }
    }

    /// Builder: replace tags.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// A declared correct match between two kind-compatible items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Unique id.
    pub id: AssociationId,
    /// Left item (phrase/expression side once the catalog orients it).
    #[serde(rename = "leftId")]
    pub left_item_id: ItemId,
    /// Right item (image/numericResult side once the catalog orients it).
    #[serde(rename = "rightId")]
    pub right_item_id: ItemId,
    /// Optional own tags; untagged associations inherit their items' filters.
    #[serde(flatten)]
    pub tags: Tags,
}

impl Association {
    /// Create an untagged association.
    pub fn new(id: u64, left: u64, right: u64) -> Self {
        Self {
            id: AssociationId(id),
            left_item_id: ItemId(left),
            right_item_id: ItemId(right),
            tags: Tags::default(),
        }
    }

    /// Builder: replace tags.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Whether this association references the given item.
    pub fn involves(&self, item: ItemId) -> bool {
        self.left_item_id == item || self.right_item_id == item
    }
}

/// Raw catalog payload as fetched from the content collaborator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogPayload {
    /// All items.
    #[serde(default)]
    pub items: Vec<Item>,
    /// All associations.
    #[serde(default)]
    pub associations: Vec<Association>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_complements() {
        for kind in ItemKind::ALL {
            assert_eq!(kind.complement().complement(), kind);
            assert_eq!(kind.pair_kind(), kind.complement().pair_kind());
            assert_ne!(kind.is_left(), kind.complement().is_left());
        }
        assert_eq!(PairKind::PhraseImage.right(), ItemKind::Image);
        assert_eq!(PairKind::ExpressionNumeric.left(), ItemKind::Expression);
    }

    #[test]
    fn test_payload_wire_format() {
        let json = r#"{
            "items": [
                {"id": 1, "kind": "phrase", "content": "cat", "gradeLevel": 2, "themes": ["animals"]},
                {"id": 2, "kind": "numericResult", "content": "12"}
            ],
            "associations": [
                {"id": 10, "leftId": 1, "rightId": 3}
            ]
        }"#;

        let payload: CatalogPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.items[0].tags.grade_level, Some(2));
        assert!(payload.items[0].tags.themes.contains("animals"));
        assert_eq!(payload.items[1].kind, ItemKind::NumericResult);
        assert!(payload.items[1].tags.is_empty());
        assert_eq!(payload.associations[0].right_item_id, ItemId(3));
    }
}
