//! Degraded boards.
//!
//! When no association of a usable kind survives filtering, the round
//! still gets a board: every zone is filled as a distractor and, where the
//! content allows it, a synthetic pair is fabricated from a value or label
//! that can be derived from one zone.

use tracing::warn;

use crate::catalog::{image_label, normalize_content, ItemKind};
use super::assign::{Assignment, Committed};
use super::board::{AssignmentIssue, ZoneContent};
use super::numeric::{evaluate, format_value, synthesize_sum};

/// Build a degraded board in place.
pub(crate) fn apply(asg: &mut Assignment<'_, '_>) {
    asg.record(AssignmentIssue::CatalogInsufficient);

    for idx in 0..asg.zones.len() {
        if asg.zones[idx].content.is_none() {
            asg.fill_zone(idx);
        }
    }

    for anchor in 0..asg.zones.len() {
        let kind = asg.zones[anchor].kind;
        let Some(&target) = asg.template.zone_indices(kind.complement()).first() else {
            continue;
        };
        let Some(partner) = derive_partner(asg, anchor) else {
            continue;
        };

        let tag = format!("synthetic-{:08x}", asg.seed);
        asg.zones[target].content = Some(partner);
        asg.zones[anchor].pair_tag = Some(tag.clone());
        asg.zones[target].pair_tag = Some(tag.clone());
        asg.pair_kind = Some(kind.pair_kind());
        asg.committed = Some(Committed {
            association_id: None,
            a: anchor,
            b: target,
            tag,
        });

        warn!(
            "Fallback board seed={:08x}: synthetic pair {} / {}",
            asg.seed, asg.zones[anchor].id, asg.zones[target].id
        );
        return;
    }

    asg.record(AssignmentIssue::NoCorrectPair);
}

/// Content for the complementary side of `anchor`, if one can be derived.
fn derive_partner(asg: &mut Assignment<'_, '_>, anchor: usize) -> Option<ZoneContent> {
    let kind = asg.zones[anchor].kind;
    let text = asg.zones[anchor].content.as_ref()?.text.clone();
    let catalog = asg.catalog;

    match kind {
        ItemKind::Expression => evaluate(&text).map(|v| ZoneContent::synthesized(format_value(v))),
        ItemKind::NumericResult => {
            let value = evaluate(&text)?;
            synthesize_sum(value, &mut asg.rng).map(ZoneContent::synthesized)
        }
        ItemKind::Image => {
            let label = image_label(&text);
            if label.is_empty() {
                return None;
            }
            let phrase = catalog
                .items_of(ItemKind::Phrase)
                .iter()
                .find(|p| normalize_content(&p.content) == label);
            Some(match phrase {
                Some(p) => ZoneContent::from_item(p.id, &p.content),
                None => ZoneContent::synthesized(label),
            })
        }
        ItemKind::Phrase => {
            let wanted = normalize_content(&text);
            catalog
                .items_of(ItemKind::Image)
                .iter()
                .find(|i| image_label(&i.content) == wanted)
                .map(|i| ZoneContent::from_item(i.id, &i.content))
        }
    }
}
