//! Board sanitization.
//!
//! Runs after placement and repeats until the board is stable:
//!
//! - no two zones of the same kind show the same normalized content
//! - no two displayed zones form an association other than the correct pair
//! - no expression evaluates to a displayed numeric result, unless the two
//!   are the correct pair
//!
//! The correct pair is never touched. Every loop is bounded by the retry
//! budgets in [`EngineConfig`](super::EngineConfig).

use std::collections::BTreeSet;

use crate::catalog::ItemKind;
use super::assign::Assignment;
use super::board::AssignmentIssue;
use super::numeric::{evaluate, perturb_operand, values_equal};

/// Two zones that should not appear together.
fn conflicts(asg: &Assignment<'_, '_>, i: usize, j: usize) -> bool {
    let (x, y) = (&asg.zones[i], &asg.zones[j]);
    let (Some(cx), Some(cy)) = (x.content_ref(), y.content_ref()) else {
        return false;
    };
    if x.kind == y.kind {
        return cx.normalized == cy.normalized;
    }
    x.kind.compatible_with(y.kind)
        && !asg.is_committed_pair(i, j)
        && asg.catalog.global().index().links(cx, cy)
}

fn find_conflict(asg: &Assignment<'_, '_>, ignored: &BTreeSet<(usize, usize)>) -> Option<(usize, usize)> {
    let n = asg.zones.len();
    (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .find(|pair| !ignored.contains(pair) && conflicts(asg, pair.0, pair.1))
}

/// Zone to replace for a conflict: the later one unless it is committed
/// or already out of retries.
fn victim(asg: &Assignment<'_, '_>, i: usize, j: usize) -> Option<usize> {
    [j, i]
        .into_iter()
        .find(|&z| !asg.is_committed(z) && !asg.exhausted[z])
}

/// Global duplicate and accidental-pair removal.
pub(crate) fn sanitize(asg: &mut Assignment<'_, '_>) {
    let max_retries = asg.config.max_retries_per_zone;
    let max_passes = asg.zones.len() * (max_retries as usize + 1) + 1;
    let mut ignored = BTreeSet::new();

    for _ in 0..max_passes {
        let Some((i, j)) = find_conflict(asg, &ignored) else {
            return;
        };

        let Some(z) = victim(asg, i, j) else {
            let zone = asg.zones[j].id;
            asg.record(AssignmentIssue::SanitizationExhausted { zone });
            ignored.insert((i, j));
            continue;
        };

        asg.replacements[z] += 1;
        if asg.replacements[z] > max_retries || !asg.fill_zone(z) {
            asg.exhausted[z] = true;
            let zone = asg.zones[z].id;
            asg.record(AssignmentIssue::SanitizationExhausted { zone });
            ignored.insert((i, j));
        }
    }

    // Pass budget ran out with conflicts still on the board.
    while let Some(pair) = find_conflict(asg, &ignored) {
        let zone = asg.zones[pair.1].id;
        asg.record(AssignmentIssue::SanitizationExhausted { zone });
        ignored.insert(pair);
    }
}

/// First (expression, numeric) zone pair with equal values that is not
/// the correct pair.
fn find_collision(asg: &Assignment<'_, '_>, ignored: &BTreeSet<(usize, usize)>) -> Option<(usize, usize)> {
    let values: Vec<Option<f64>> = asg
        .zones
        .iter()
        .map(|z| match z.kind {
            ItemKind::Expression | ItemKind::NumericResult => {
                z.content.as_ref().and_then(|c| evaluate(&c.text))
            }
            _ => None,
        })
        .collect();

    for (e, expr) in asg.zones.iter().enumerate() {
        if expr.kind != ItemKind::Expression {
            continue;
        }
        let Some(ve) = values[e] else { continue };

        for (r, result) in asg.zones.iter().enumerate() {
            if result.kind != ItemKind::NumericResult
                || asg.is_committed_pair(e, r)
                || ignored.contains(&(e, r))
            {
                continue;
            }
            if values[r].is_some_and(|vr| values_equal(ve, vr)) {
                return Some((e, r));
            }
        }
    }
    None
}

/// Numeric collision rule.
///
/// For each colliding pair: rewrite an operand of the expression (if it is
/// not part of the correct pair), else replace the numeric result, else
/// replace the expression. Anything left is recorded as unresolved.
pub(crate) fn enforce_numeric_rule(asg: &mut Assignment<'_, '_>) {
    let max_perturbations = asg.config.max_numeric_perturbations;
    let max_retries = asg.config.max_retries_per_zone;
    let n = asg.zones.len();
    let bound = n * (max_perturbations as usize + max_retries as usize + 1) + 1;

    let mut perturbations = vec![0u32; n];
    let mut ignored = BTreeSet::new();

    for _ in 0..bound {
        let Some((e, r)) = find_collision(asg, &ignored) else {
            return;
        };

        if !asg.is_committed(e) && perturbations[e] < max_perturbations {
            perturbations[e] += 1;
            let Some(current) = asg.zones[e].content.clone() else {
                continue;
            };
            if let Some(text) = perturb_operand(&current.text, &mut asg.rng) {
                let rewritten = current.perturbed_to(text);
                if !asg.duplicates_same_kind(e, rewritten.normalized()) {
                    asg.zones[e].content = Some(rewritten);
                }
            }
            continue;
        }

        if replace(asg, r, max_retries) || replace(asg, e, max_retries) {
            continue;
        }

        let zone = asg.zones[e].id;
        asg.record(AssignmentIssue::NumericCollisionUnresolved { zone });
        ignored.insert((e, r));
    }

    while let Some(pair) = find_collision(asg, &ignored) {
        let zone = asg.zones[pair.0].id;
        asg.record(AssignmentIssue::NumericCollisionUnresolved { zone });
        ignored.insert(pair);
    }
}

/// Try to redraw a non-committed zone within its replacement budget.
fn replace(asg: &mut Assignment<'_, '_>, idx: usize, max_retries: u32) -> bool {
    if asg.is_committed(idx) || asg.exhausted[idx] {
        return false;
    }
    asg.replacements[idx] += 1;
    if asg.replacements[idx] <= max_retries && asg.fill_zone(idx) {
        return true;
    }
    asg.exhausted[idx] = true;
    false
}
