//! Global Association Index
//!
//! Built once from the *unfiltered* catalog. The engine consults it to
//! make sure no two displayed zones accidentally form a real pair, even
//! when one of the items was filtered out of the active snapshot.

use std::collections::BTreeSet;

use super::item::{Association, Item, ItemId, ItemKind, PairKind};
use super::normalize::normalize_content;

/// Something displayed on the board, as seen by the index.
#[derive(Clone, Copy, Debug)]
pub struct ContentRef<'a> {
    /// Kind of the zone showing it.
    pub kind: ItemKind,
    /// Source item, if the content came straight from the catalog.
    pub item_id: Option<ItemId>,
    /// Normalized displayed text.
    pub normalized: &'a str,
}

/// Lookup of every declared association by id pair and by content pair.
#[derive(Clone, Debug, Default)]
pub struct AssociationIndex {
    /// Oriented (left, right) item ids.
    by_id: BTreeSet<(ItemId, ItemId)>,
    /// (pair kind, left normalized, right normalized).
    by_content: BTreeSet<(PairKind, String, String)>,
}

impl AssociationIndex {
    /// Build from oriented associations and the items they reference.
    pub fn build<'a>(
        associations: impl IntoIterator<Item = &'a Association>,
        lookup: impl Fn(ItemId) -> Option<&'a Item>,
    ) -> Self {
        let mut index = Self::default();
        for assoc in associations {
            let (Some(left), Some(right)) = (lookup(assoc.left_item_id), lookup(assoc.right_item_id)) else {
                continue;
            };
            index.by_id.insert((left.id, right.id));
            index.by_content.insert((
                left.kind.pair_kind(),
                normalize_content(&left.content),
                normalize_content(&right.content),
            ));
        }
        index
    }

    /// Number of distinct id pairs.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Whether two items are declared as a pair.
    pub fn contains_ids(&self, a: ItemId, b: ItemId) -> bool {
        self.by_id.contains(&(a, b)) || self.by_id.contains(&(b, a))
    }

    /// Whether two displayed contents form a real association.
    ///
    /// Matches by item id when both sides have one, and by normalized
    /// content otherwise, so a duplicate item carrying an associated text
    /// is still caught.
    pub fn links(&self, a: ContentRef<'_>, b: ContentRef<'_>) -> bool {
        if !a.kind.compatible_with(b.kind) {
            return false;
        }
        let (left, right) = if a.kind.is_left() { (a, b) } else { (b, a) };

        if let (Some(l), Some(r)) = (left.item_id, right.item_id) {
            if self.by_id.contains(&(l, r)) {
                return true;
            }
        }

        self.by_content.contains(&(
            left.kind.pair_kind(),
            left.normalized.to_owned(),
            right.normalized.to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fixture() -> (BTreeMap<ItemId, Item>, Vec<Association>) {
        let items: BTreeMap<ItemId, Item> = [
            Item::new(1, ItemKind::Phrase, "Cat"),
            Item::new(2, ItemKind::Image, "cat.png"),
            Item::new(3, ItemKind::Phrase, "cat"),
            Item::new(4, ItemKind::Image, "dog.png"),
        ]
        .into_iter()
        .map(|i| (i.id, i))
        .collect();
        (items, vec![Association::new(1, 1, 2)])
    }

    #[test]
    fn test_links_by_id_either_order() {
        let (items, assocs) = fixture();
        let index = AssociationIndex::build(&assocs, |id| items.get(&id));

        let phrase = ContentRef { kind: ItemKind::Phrase, item_id: Some(ItemId(1)), normalized: "cat" };
        let image = ContentRef { kind: ItemKind::Image, item_id: Some(ItemId(2)), normalized: "cat.png" };

        assert!(index.links(phrase, image));
        assert!(index.links(image, phrase));
        assert!(index.contains_ids(ItemId(2), ItemId(1)));
    }

    #[test]
    fn test_links_by_content_for_duplicate_item() {
        let (items, assocs) = fixture();
        let index = AssociationIndex::build(&assocs, |id| items.get(&id));

        // Item 3 is a different id with the same normalized text as item 1.
        let dup = ContentRef { kind: ItemKind::Phrase, item_id: Some(ItemId(3)), normalized: "cat" };
        let image = ContentRef { kind: ItemKind::Image, item_id: Some(ItemId(2)), normalized: "cat.png" };
        assert!(index.links(dup, image));
    }

    #[test]
    fn test_incompatible_kinds_never_link() {
        let (items, assocs) = fixture();
        let index = AssociationIndex::build(&assocs, |id| items.get(&id));

        let a = ContentRef { kind: ItemKind::Phrase, item_id: Some(ItemId(1)), normalized: "cat" };
        let b = ContentRef { kind: ItemKind::Phrase, item_id: Some(ItemId(3)), normalized: "cat" };
        assert!(!index.links(a, b));

        let dog = ContentRef { kind: ItemKind::Image, item_id: Some(ItemId(4)), normalized: "dog.png" };
        assert!(!index.links(a, dog));
    }
}
