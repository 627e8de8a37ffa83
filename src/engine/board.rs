//! Board Definitions
//!
//! A board is a template with content written into every zone. It is built
//! fresh for a round, frozen once the round begins and discarded after the
//! reveal.

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{AssociationId, ContentRef, ItemId, ItemKind, PairKind, normalize_content};
use crate::core::hash::{StateHash, StateHasher};
use super::template::{ZoneGeometry, ZoneId};

/// Content shown in a zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ZoneContent {
    /// Source item (absent for synthesized fallback content).
    pub item_id: Option<ItemId>,
    /// Displayed text / image reference / expression / number.
    pub text: String,
    /// Whether an expression operand was rewritten to avoid a collision.
    pub perturbed: bool,
    #[serde(skip)]
    normalized: String,
}

impl ZoneContent {
    /// Content taken from a catalog item.
    pub fn from_item(item_id: ItemId, text: &str) -> Self {
        Self {
            item_id: Some(item_id),
            text: text.to_owned(),
            perturbed: false,
            normalized: normalize_content(text),
        }
    }

    /// Content that has no catalog item behind it.
    pub fn synthesized(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            item_id: None,
            normalized: normalize_content(&text),
            text,
            perturbed: false,
        }
    }

    /// This content with one expression operand rewritten.
    pub fn perturbed_to(&self, text: String) -> Self {
        Self {
            item_id: self.item_id,
            normalized: normalize_content(&text),
            text,
            perturbed: true,
        }
    }

    /// Normalized text used for duplicate detection.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// A placeholder slot on the board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Zone id from the template.
    pub id: ZoneId,
    /// Content kind.
    pub kind: ItemKind,
    /// Layout, passed through to the renderer.
    pub geometry: ZoneGeometry,
    /// Assigned content.
    pub content: Option<ZoneContent>,
    /// Shared tag of the round's correct pair.
    pub pair_tag: Option<String>,
}

impl Zone {
    /// View of this zone for the association index.
    pub fn content_ref(&self) -> Option<ContentRef<'_>> {
        self.content.as_ref().map(|c| ContentRef {
            kind: self.kind,
            item_id: c.item_id,
            normalized: c.normalized(),
        })
    }
}

/// The zones forming the round's correct pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedPair {
    /// Backing association; `None` for a synthetic fallback pair.
    pub association_id: Option<AssociationId>,
    /// Zone on the phrase/expression side (or the anchor, for fallbacks).
    pub zone_a: ZoneId,
    /// Zone on the complementary side.
    pub zone_b: ZoneId,
    /// Shared pair tag.
    pub pair_tag: String,
}

impl CommittedPair {
    /// Whether an attempt names exactly these two zones, in either order.
    pub fn matches(&self, a: ZoneId, b: ZoneId) -> bool {
        (self.zone_a == a && self.zone_b == b) || (self.zone_a == b && self.zone_b == a)
    }
}

/// Recoverable problems met while assigning content.
///
/// Recorded on the board and logged; never surfaced to players as failure.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum AssignmentIssue {
    /// No valid association of any needed kind survived filtering.
    #[error("catalog insufficient: no usable association for this template")]
    CatalogInsufficient,

    /// Fallback could not fabricate a pair either.
    #[error("fallback produced no correct pair")]
    NoCorrectPair,

    /// Anti-collision retries for a zone ran out.
    #[error("sanitization exhausted for {zone}")]
    SanitizationExhausted {
        /// Zone left with best-effort content.
        zone: ZoneId,
    },

    /// An expression still evaluates to a displayed numeric result.
    #[error("numeric collision unresolved at {zone}")]
    NumericCollisionUnresolved {
        /// Expression zone.
        zone: ZoneId,
    },

    /// No candidate content exists for a zone's kind.
    #[error("no {kind:?} content available for {zone}")]
    EmptyPool {
        /// Zone left empty.
        zone: ZoneId,
        /// Requested kind.
        kind: ItemKind,
    },
}

/// Quality flags of a generated board.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BoardStatus {
    /// Built through the fallback path.
    pub degraded: bool,
    /// Some collision could not be removed.
    pub unsanitized: bool,
    /// Everything that went wrong, in order.
    pub issues: Vec<AssignmentIssue>,
}

impl BoardStatus {
    /// Whether the board was built without any compromise.
    pub fn is_clean(&self) -> bool {
        !self.degraded && !self.unsanitized && self.issues.is_empty()
    }
}

/// A fully populated board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    /// Seed the board was computed from.
    pub seed: u32,
    /// Template reference.
    pub template_id: String,
    /// Pair kind chosen for the round.
    pub pair_kind: Option<PairKind>,
    /// Zones in template order.
    pub zones: Vec<Zone>,
    /// The correct pair.
    pub committed: Option<CommittedPair>,
    /// Quality flags.
    pub status: BoardStatus,
}

impl Board {
    /// Look up a zone.
    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    /// The correct pair's zone ids.
    pub fn correct_pair(&self) -> Option<(ZoneId, ZoneId)> {
        self.committed.as_ref().map(|c| (c.zone_a, c.zone_b))
    }

    /// Whether a pair attempt names the correct pair.
    pub fn is_winning_attempt(&self, a: ZoneId, b: ZoneId) -> bool {
        a != b && self.committed.as_ref().is_some_and(|c| c.matches(a, b))
    }

    /// Zones carrying a pair tag.
    pub fn tagged_zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter().filter(|z| z.pair_tag.is_some())
    }

    /// Fingerprint of everything a renderer would draw.
    ///
    /// Two clients agree on a round exactly when their hashes match.
    pub fn hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_board();
        hasher.update_u32(self.seed);
        hasher.update_str(&self.template_id);
        hasher.update_u8(self.pair_kind.map(|k| k as u8 + 1).unwrap_or(0));
        hasher.update_u32(self.zones.len() as u32);
        for zone in &self.zones {
            hasher.update_u32(zone.id.0);
            hasher.update_u8(zone.kind as u8);
            match &zone.content {
                Some(content) => {
                    hasher.update_u8(1);
                    hasher.update_opt_u64(content.item_id.map(|id| id.0));
                    hasher.update_str(&content.text);
                    hasher.update_bool(content.perturbed);
                }
                None => hasher.update_u8(0),
            }
            hasher.update_str(zone.pair_tag.as_deref().unwrap_or(""));
        }
        hasher.update_bool(self.status.degraded);
        hasher.update_bool(self.status.unsanitized);
        hasher.finalize()
    }
}
