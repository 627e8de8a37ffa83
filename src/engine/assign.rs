//! Content-to-Board Assignment
//!
//! Turns `(seed, template, filtered catalog)` into a populated board with
//! exactly one correct pair and distractors that never form a second one.
//!
//! ## Pipeline
//!
//! 1. Pair-kind selection
//! 2. Correct-pair placement
//! 3. Distractor placement
//! 4. Global sanitization + numeric collision rule (`sanitize.rs`)
//! 5. Fallback when no association is usable (`fallback.rs`)
//!
//! # Determinism
//!
//! Every random choice goes through one [`SeededRng`] over lists that are
//! sorted by id or kept in template order. No hash-ordered collection is
//! ever iterated.

use tracing::debug;
#[cfg(feature = "debug-tracing")]
use tracing::trace;
use tracing::warn;

use crate::catalog::{AssociationId, ContentRef, FilteredCatalog, Item, PairKind, normalize_content};
use crate::core::rng::SeededRng;
use super::board::{AssignmentIssue, Board, BoardStatus, CommittedPair, Zone, ZoneContent};
use super::template::BoardTemplate;
use super::{fallback, sanitize};

/// Tuning knobs for the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Candidates inspected per zone fill, and replacements allowed per zone.
    pub max_retries_per_zone: u32,
    /// Operand rewrites allowed per expression zone.
    pub max_numeric_perturbations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries_per_zone: 20,
            max_numeric_perturbations: 12,
        }
    }
}

/// Compute the board for a round (`computeBoard`).
///
/// Pure: identical inputs always yield a bit-identical board.
pub fn compute_board(seed: u32, template: &BoardTemplate, catalog: &FilteredCatalog<'_>) -> Board {
    compute_board_with(seed, template, catalog, &EngineConfig::default())
}

/// [`compute_board`] with explicit engine configuration.
pub fn compute_board_with(
    seed: u32,
    template: &BoardTemplate,
    catalog: &FilteredCatalog<'_>,
    config: &EngineConfig,
) -> Board {
    let mut asg = Assignment::new(seed, template, catalog, config);

    let placed = match asg.select_pair_kind() {
        Some(kind) => asg.place_correct_pair(kind),
        None => false,
    };

    if placed {
        asg.place_distractors();
    } else {
        fallback::apply(&mut asg);
    }

    sanitize::sanitize(&mut asg);
    sanitize::enforce_numeric_rule(&mut asg);
    // Rewritten operands can introduce new duplicates.
    sanitize::sanitize(&mut asg);

    asg.finish()
}

/// Correct pair as zone indices while the board is under construction.
#[derive(Clone, Debug)]
pub(crate) struct Committed {
    pub(crate) association_id: Option<AssociationId>,
    pub(crate) a: usize,
    pub(crate) b: usize,
    pub(crate) tag: String,
}

/// Working state of one assignment run.
pub(crate) struct Assignment<'c, 'a> {
    pub(crate) seed: u32,
    pub(crate) template: &'c BoardTemplate,
    pub(crate) catalog: &'c FilteredCatalog<'a>,
    pub(crate) config: &'c EngineConfig,
    pub(crate) rng: SeededRng,
    pub(crate) zones: Vec<Zone>,
    pub(crate) pair_kind: Option<PairKind>,
    pub(crate) committed: Option<Committed>,
    pub(crate) status: BoardStatus,
    /// Replacement count per zone.
    pub(crate) replacements: Vec<u32>,
    /// Zones whose retry budget is spent.
    pub(crate) exhausted: Vec<bool>,
}

impl<'c, 'a> Assignment<'c, 'a> {
    pub(crate) fn new(
        seed: u32,
        template: &'c BoardTemplate,
        catalog: &'c FilteredCatalog<'a>,
        config: &'c EngineConfig,
    ) -> Self {
        let zones: Vec<Zone> = template
            .zones
            .iter()
            .map(|z| Zone {
                id: z.id,
                kind: z.kind,
                geometry: z.geometry,
                content: None,
                pair_tag: None,
            })
            .collect();
        let n = zones.len();

        Self {
            seed,
            template,
            catalog,
            config,
            rng: SeededRng::new(seed),
            zones,
            pair_kind: None,
            committed: None,
            status: BoardStatus::default(),
            replacements: vec![0; n],
            exhausted: vec![false; n],
        }
    }

    /// Pair kinds with zones on both sides and at least one association.
    pub(crate) fn available_pair_kinds(&self) -> Vec<PairKind> {
        PairKind::ALL
            .into_iter()
            .filter(|k| {
                self.template.has_kind(k.left())
                    && self.template.has_kind(k.right())
                    && !self.catalog.associations_of(*k).is_empty()
            })
            .collect()
    }

    /// Step 1: both available → uniform pick; one → that one; none → fallback.
    pub(crate) fn select_pair_kind(&mut self) -> Option<PairKind> {
        let available = self.available_pair_kinds();
        match available.len() {
            0 => None,
            1 => Some(available[0]),
            _ => self.rng.choose(&available).copied(),
        }
    }

    /// Step 2: draw one association and one zone per side.
    pub(crate) fn place_correct_pair(&mut self, kind: PairKind) -> bool {
        let catalog = self.catalog;
        let Some(&assoc) = self.rng.choose(catalog.associations_of(kind)) else {
            return false;
        };
        let global = catalog.global();
        let (Some(left), Some(right)) = (global.item(assoc.left_item_id), global.item(assoc.right_item_id)) else {
            return false;
        };

        let left_zones = self.template.zone_indices(kind.left());
        let right_zones = self.template.zone_indices(kind.right());
        let (Some(&a), Some(&b)) = (self.rng.choose(&left_zones), self.rng.choose(&right_zones)) else {
            return false;
        };

        let tag = format!("pair-{:08x}", self.seed);
        self.place(a, left);
        self.place(b, right);
        self.zones[a].pair_tag = Some(tag.clone());
        self.zones[b].pair_tag = Some(tag.clone());

        #[cfg(feature = "debug-tracing")]
        trace!("Committed {} at zones {} / {}", assoc.id, self.zones[a].id, self.zones[b].id);

        self.pair_kind = Some(kind);
        self.committed = Some(Committed {
            association_id: Some(assoc.id),
            a,
            b,
            tag,
        });
        true
    }

    /// Step 3: fill every remaining zone as a distractor, in template order.
    pub(crate) fn place_distractors(&mut self) {
        for idx in 0..self.zones.len() {
            if self.zones[idx].content.is_none() {
                self.fill_zone(idx);
            }
        }
    }

    pub(crate) fn is_committed(&self, idx: usize) -> bool {
        self.committed.as_ref().is_some_and(|c| c.a == idx || c.b == idx)
    }

    pub(crate) fn is_committed_pair(&self, i: usize, j: usize) -> bool {
        self.committed
            .as_ref()
            .is_some_and(|c| (c.a == i && c.b == j) || (c.a == j && c.b == i))
    }

    /// Whether `idx` could show `candidate` without a visible duplicate or
    /// an accidental pair with anything already on the board.
    fn acceptable(&self, idx: usize, candidate: &Item) -> bool {
        let kind = self.zones[idx].kind;
        let normalized = normalize_content(&candidate.content);
        let probe = ContentRef {
            kind,
            item_id: Some(candidate.id),
            normalized: &normalized,
        };
        let index = self.catalog.global().index();

        self.zones.iter().enumerate().all(|(j, other)| {
            if j == idx {
                return true;
            }
            let Some(content) = other.content.as_ref() else {
                return true;
            };
            if content.item_id == Some(candidate.id) {
                return false;
            }
            if other.kind == kind && content.normalized() == normalized {
                return false;
            }
            match other.content_ref() {
                Some(shown) if other.kind.compatible_with(kind) => !index.links(probe, shown),
                _ => true,
            }
        })
    }

    /// Whether another zone already shows this item.
    fn displayed_elsewhere(&self, idx: usize, candidate: &Item) -> bool {
        self.zones.iter().enumerate().any(|(j, z)| {
            j != idx && z.content.as_ref().is_some_and(|c| c.item_id == Some(candidate.id))
        })
    }

    /// Whether another zone of the same kind already shows this text.
    pub(crate) fn duplicates_same_kind(&self, idx: usize, normalized: &str) -> bool {
        let kind = self.zones[idx].kind;
        self.zones.iter().enumerate().any(|(j, z)| {
            j != idx
                && z.kind == kind
                && z.content.as_ref().is_some_and(|c| c.normalized() == normalized)
        })
    }

    /// Draw new content for a zone from a shuffled copy of its pool.
    ///
    /// Inspects at most `max_retries_per_zone` candidates. On exhaustion an
    /// empty zone gets the first unused candidate (best effort), an already
    /// filled zone keeps its content, and the board is flagged.
    pub(crate) fn fill_zone(&mut self, idx: usize) -> bool {
        let kind = self.zones[idx].kind;
        let zone_id = self.zones[idx].id;
        let catalog = self.catalog;

        let mut pool: Vec<&Item> = catalog.items_of(kind).to_vec();
        if pool.is_empty() {
            self.record(AssignmentIssue::EmptyPool { zone: zone_id, kind });
            return false;
        }
        self.rng.shuffle(&mut pool);

        let current = self.zones[idx].content.as_ref().and_then(|c| c.item_id);
        let budget = self.config.max_retries_per_zone as usize;
        let mut best_effort: Option<&Item> = None;
        let mut inspected = 0usize;

        for candidate in pool {
            if inspected >= budget {
                break;
            }
            if current == Some(candidate.id) {
                continue;
            }
            inspected += 1;
            if self.acceptable(idx, candidate) {
                self.place(idx, candidate);
                return true;
            }
            if best_effort.is_none() && !self.displayed_elsewhere(idx, candidate) {
                best_effort = Some(candidate);
            }
        }

        if self.zones[idx].content.is_none() {
            if let Some(candidate) = best_effort {
                self.place(idx, candidate);
            }
        }
        self.record(AssignmentIssue::SanitizationExhausted { zone: zone_id });
        false
    }

    pub(crate) fn place(&mut self, idx: usize, item: &Item) {
        self.zones[idx].content = Some(ZoneContent::from_item(item.id, &item.content));
    }

    /// Record an issue once, flag the board and log it.
    pub(crate) fn record(&mut self, issue: AssignmentIssue) {
        if self.status.issues.contains(&issue) {
            return;
        }
        match issue {
            AssignmentIssue::SanitizationExhausted { .. }
            | AssignmentIssue::NumericCollisionUnresolved { .. } => self.status.unsanitized = true,
            AssignmentIssue::CatalogInsufficient | AssignmentIssue::NoCorrectPair => {
                self.status.degraded = true
            }
            AssignmentIssue::EmptyPool { .. } => {}
        }
        warn!(
            "Board seed={:08x} template={}: {}",
            self.seed, self.template.id, issue
        );
        self.status.issues.push(issue);
    }

    pub(crate) fn finish(self) -> Board {
        let committed = self.committed.map(|c| CommittedPair {
            association_id: c.association_id,
            zone_a: self.zones[c.a].id,
            zone_b: self.zones[c.b].id,
            pair_tag: c.tag,
        });

        let board = Board {
            seed: self.seed,
            template_id: self.template.id.clone(),
            pair_kind: self.pair_kind,
            zones: self.zones,
            committed,
            status: self.status,
        };

        debug!(
            "Board seed={:08x} template={} hash={} clean={}",
            board.seed,
            board.template_id,
            hex::encode(&board.hash()[..8]),
            board.status.is_clean()
        );
        board
    }
}
