//! Session winner selection.

use serde::{Serialize, Deserialize};

use super::player::Player;

/// How a tie on the highest score is broken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreakPolicy {
    /// The tied player who reached the top score first wins.
    #[default]
    EarliestToReachMax,
    /// A tie means no winner.
    NoWinner,
}

/// Pick the session winner.
///
/// Nobody wins a session in which nobody scored.
pub fn pick_winner(players: &[Player], policy: TieBreakPolicy) -> Option<&Player> {
    let max = players.iter().map(|p| p.score).max()?;
    if max == 0 {
        return None;
    }

    let mut leaders = players.iter().filter(|p| p.score == max);
    let first = leaders.next()?;
    let rest: Vec<&Player> = leaders.collect();
    if rest.is_empty() {
        return Some(first);
    }

    match policy {
        TieBreakPolicy::EarliestToReachMax => std::iter::once(first)
            .chain(rest)
            .min_by_key(|p| p.scored_at),
        TieBreakPolicy::NoWinner => None,
    }
}
