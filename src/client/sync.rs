//! Client-side round synchronization.
//!
//! Clients never receive a board. They receive `round.start { seed,
//! templateRef, roundIndex }` and compute the board themselves from the
//! same catalog and the room's filter. [`ClientSync`] folds server messages
//! into local state and notices when a broadcast was missed.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::FilterConfig;
use crate::core::rng::SeededRng;
use crate::engine::board::Board;
use crate::engine::library::{ContentLibrary, LibraryError};
use crate::engine::template::ZoneId;
use crate::network::protocol::{ClientMessage, RoomSnapshot, RoundStart, ServerMessage};
use crate::session::{PlayerId, PlayerScore, RoomStatus, SessionRecord};

/// Result of applying one server message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Local state updated.
    Applied,
    /// A round's board was computed and is ready to render.
    RoundReady {
        /// Round index.
        round_index: u32,
    },
    /// The session is over.
    SessionEnded,
    /// A broadcast was missed; send this request.
    NeedsResync(ClientMessage),
    /// Nothing to track (pong, errors, shutdown).
    Ignored,
}

/// The round the client is looking at.
#[derive(Debug, Clone)]
pub struct LocalRound {
    /// Announcement it was computed from.
    pub start: RoundStart,
    /// Locally computed board.
    pub board: Board,
    /// Set once the round's result or timeout arrived.
    pub resolved: bool,
}

/// Folds server broadcasts into a client's view of its room.
#[derive(Debug)]
pub struct ClientSync {
    library: Arc<ContentLibrary>,
    player_id: Option<PlayerId>,
    room: Option<RoomSnapshot>,
    round: Option<LocalRound>,
    countdown: Option<u32>,
    scores: Vec<PlayerScore>,
    history: Vec<SessionRecord>,
}

impl ClientSync {
    /// Track a room using this client's content.
    pub fn new(library: Arc<ContentLibrary>) -> Self {
        Self {
            library,
            player_id: None,
            room: None,
            round: None,
            countdown: None,
            scores: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Swap in refreshed content.
    pub fn set_library(&mut self, library: Arc<ContentLibrary>) {
        self.library = library;
    }

    /// Our player id, once joined.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    /// Latest room snapshot.
    pub fn room(&self) -> Option<&RoomSnapshot> {
        self.room.as_ref()
    }

    /// Current round.
    pub fn round(&self) -> Option<&LocalRound> {
        self.round.as_ref()
    }

    /// Current board.
    pub fn board(&self) -> Option<&Board> {
        self.round.as_ref().map(|r| &r.board)
    }

    /// Seconds left before the first round.
    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    /// Latest scores.
    pub fn scores(&self) -> &[PlayerScore] {
        &self.scores
    }

    /// Session history as last received.
    pub fn history(&self) -> &[SessionRecord] {
        &self.history
    }

    /// Whether we are the room's host.
    pub fn is_host(&self) -> bool {
        match (&self.room, self.player_id) {
            (Some(room), Some(me)) => room.host().is_some_and(|h| h.id == me),
            _ => false,
        }
    }

    /// Apply a server message.
    pub fn apply(&mut self, msg: &ServerMessage) -> SyncOutcome {
        match msg {
            ServerMessage::RoomJoined { player_id, .. } => {
                self.player_id = Some(*player_id);
                SyncOutcome::Applied
            }
            ServerMessage::RoomState(snapshot) => self.apply_state(snapshot),
            ServerMessage::Countdown { seconds_remaining } => {
                self.countdown = Some(*seconds_remaining);
                SyncOutcome::Applied
            }
            ServerMessage::RoundStart(start) => self.apply_round_start(start),
            ServerMessage::RoundResult { round_index, .. }
            | ServerMessage::RoundTimeout { round_index, .. } => self.resolve(*round_index),
            ServerMessage::ScoreUpdate { scores } => {
                self.scores = scores.clone();
                SyncOutcome::Applied
            }
            ServerMessage::SessionEnd { per_player_scores, .. } => {
                self.scores = per_player_scores.clone();
                self.round = None;
                self.countdown = None;
                SyncOutcome::SessionEnded
            }
            ServerMessage::SessionHistory { records } => {
                self.history = records.clone();
                SyncOutcome::Applied
            }
            ServerMessage::Error(_) | ServerMessage::Pong { .. } | ServerMessage::Shutdown { .. } => {
                SyncOutcome::Ignored
            }
        }
    }

    fn apply_state(&mut self, snapshot: &RoomSnapshot) -> SyncOutcome {
        self.room = Some(snapshot.clone());
        if snapshot.status == RoomStatus::Lobby {
            self.round = None;
            self.countdown = None;
        }
        if snapshot.catalog_version != self.library.version() {
            warn!(
                "Catalog mismatch: server {} local {}",
                short(&snapshot.catalog_version),
                short(self.library.version())
            );
            return resync();
        }
        SyncOutcome::Applied
    }

    fn apply_round_start(&mut self, start: &RoundStart) -> SyncOutcome {
        self.countdown = None;

        // Only a later round than the next one betrays a gap; late joiners
        // and resync answers may legitimately start anywhere.
        let gap = self
            .round
            .as_ref()
            .is_some_and(|r| start.round_index > r.start.round_index.saturating_add(1));

        let filter = self.filter();
        let board = match self
            .library
            .compute_round(start.seed, &start.template_ref, &filter)
        {
            Ok(board) => board,
            Err(e) => {
                warn!("Cannot compute round {}: {}", start.round_index, e);
                self.round = None;
                return resync();
            }
        };

        self.round = Some(LocalRound {
            start: start.clone(),
            board,
            resolved: false,
        });

        if gap {
            debug!("Round gap detected before round {}", start.round_index);
            return resync();
        }
        SyncOutcome::RoundReady {
            round_index: start.round_index,
        }
    }

    fn resolve(&mut self, round_index: u32) -> SyncOutcome {
        match &mut self.round {
            Some(round) if round.start.round_index == round_index => {
                round.resolved = true;
                SyncOutcome::Applied
            }
            _ => {
                debug!("Result for unknown round {}", round_index);
                resync()
            }
        }
    }

    /// `attempt.pair` for the current round, if one is open.
    pub fn attempt(&self, zone_a: ZoneId, zone_b: ZoneId) -> Option<ClientMessage> {
        let round = self.round.as_ref().filter(|r| !r.resolved)?;
        Some(ClientMessage::AttemptPair {
            zone_a,
            zone_b,
            round_index: Some(round.start.round_index),
        })
    }

    /// A local practice board from an unseeded generator.
    pub fn solo_round(&self) -> Result<Board, LibraryError> {
        let seed = SeededRng::unseeded().seed();
        let template_ref = self.library.select_template(seed)?;
        self.library.compute_round(seed, template_ref, &self.filter())
    }

    fn filter(&self) -> FilterConfig {
        self.room
            .as_ref()
            .map(|r| r.filter.clone())
            .unwrap_or_default()
    }
}

fn resync() -> SyncOutcome {
    SyncOutcome::NeedsResync(ClientMessage::SyncRequest)
}

fn short(version: &str) -> &str {
    version.get(..12).unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::catalog::Catalog;
    use crate::engine::library::ContentStore;
    use crate::engine::template::TemplateRegistry;
    use crate::session::{Effect, FixedEntropy, Room, RoomEvent, SessionConfig, TimerKind};

    fn library() -> Arc<ContentLibrary> {
        Arc::new(ContentLibrary::new(sample_catalog(), TemplateRegistry::builtin()))
    }

    fn pid(n: u8) -> PlayerId {
        PlayerId::from_bytes([n; 16])
    }

    /// Messages a given player would receive.
    fn inbox(effects: &[Effect], me: PlayerId) -> Vec<ServerMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Broadcast(msg) => Some(msg.clone()),
                Effect::Send { to, msg } if *to == me => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    fn started_room() -> (Room, Vec<Effect>) {
        let store = ContentStore::new(ContentLibrary::new(sample_catalog(), TemplateRegistry::builtin()));
        let mut room = Room::new("SYNCS", SessionConfig::default(), store, Box::new(FixedEntropy([5; 32])));
        let mut effects = Vec::new();
        for i in 1..=2 {
            effects.extend(room.handle(RoomEvent::Join { player: pid(i), nickname: format!("p{}", i) }));
            effects.extend(room.handle(RoomEvent::ToggleReady { player: pid(i), ready: true }));
        }
        room.handle(RoomEvent::SetFilter {
            player: pid(1),
            filter: FilterConfig::default().with_theme("space"),
        });
        effects.extend(room.handle(RoomEvent::Start { player: pid(1) }));
        loop {
            let token = effects.iter().rev().find_map(|e| match e {
                Effect::ScheduleTimer { timer: TimerKind::Countdown, token, .. } => Some(*token),
                _ => None,
            });
            let Some(token) = token else { break };
            let tick = room.handle(RoomEvent::CountdownTick { token });
            effects.retain(|e| !matches!(e, Effect::ScheduleTimer { timer: TimerKind::Countdown, .. }));
            effects.extend(tick);
        }
        (room, effects)
    }

    #[test]
    fn test_client_board_matches_server() {
        let (room, effects) = started_room();
        let mut client = ClientSync::new(library());

        let mut ready = None;
        for msg in inbox(&effects, pid(2)) {
            if let SyncOutcome::RoundReady { round_index } = client.apply(&msg) {
                ready = Some(round_index);
            }
        }

        assert_eq!(ready, Some(0));
        assert_eq!(client.player_id(), Some(pid(2)));
        assert!(!client.is_host());
        assert_eq!(client.room().unwrap().filter, FilterConfig::default().with_theme("space"));
        assert_eq!(client.board().unwrap().hash(), room.current_board().unwrap().hash());
    }

    #[test]
    fn test_round_gap_requests_resync() {
        let mut client = ClientSync::new(library());
        let start = |round_index| {
            ServerMessage::RoundStart(RoundStart {
                seed: 42,
                template_ref: "mixed-4x3".into(),
                round_index,
            })
        };

        assert_eq!(client.apply(&start(3)), SyncOutcome::RoundReady { round_index: 3 });
        assert_eq!(client.apply(&start(4)), SyncOutcome::RoundReady { round_index: 4 });
        assert_eq!(
            client.apply(&start(6)),
            SyncOutcome::NeedsResync(ClientMessage::SyncRequest)
        );
        // The board is still usable.
        assert_eq!(client.round().unwrap().start.round_index, 6);
    }

    #[test]
    fn test_last_round_index_does_not_overflow() {
        let mut client = ClientSync::new(library());
        let start = |round_index| {
            ServerMessage::RoundStart(RoundStart {
                seed: 9,
                template_ref: "mixed-4x3".into(),
                round_index,
            })
        };

        assert_eq!(
            client.apply(&start(u32::MAX)),
            SyncOutcome::RoundReady { round_index: u32::MAX }
        );
        assert_eq!(
            client.apply(&start(u32::MAX)),
            SyncOutcome::RoundReady { round_index: u32::MAX }
        );
    }

    #[test]
    fn test_unknown_round_result_requests_resync() {
        let mut client = ClientSync::new(library());
        let result = ServerMessage::RoundResult {
            round_index: 2,
            winner_id: pid(1),
            winner_name: "p1".into(),
        };
        assert_eq!(client.apply(&result), SyncOutcome::NeedsResync(ClientMessage::SyncRequest));

        client.apply(&ServerMessage::RoundStart(RoundStart {
            seed: 7,
            template_ref: "classic-5x5".into(),
            round_index: 2,
        }));
        assert_eq!(client.apply(&result), SyncOutcome::Applied);
        assert!(client.round().unwrap().resolved);
        assert!(client.attempt(ZoneId(0), ZoneId(1)).is_none());
    }

    #[test]
    fn test_catalog_mismatch_requests_resync() {
        let (room, _) = started_room();
        let mut client = ClientSync::new(Arc::new(ContentLibrary::new(
            Catalog::empty(),
            TemplateRegistry::builtin(),
        )));
        let outcome = client.apply(&ServerMessage::RoomState(room.snapshot()));
        assert_eq!(outcome, SyncOutcome::NeedsResync(ClientMessage::SyncRequest));
    }

    #[test]
    fn test_unknown_template_requests_resync() {
        let mut client = ClientSync::new(library());
        let outcome = client.apply(&ServerMessage::RoundStart(RoundStart {
            seed: 1,
            template_ref: "missing".into(),
            round_index: 0,
        }));
        assert_eq!(outcome, SyncOutcome::NeedsResync(ClientMessage::SyncRequest));
        assert!(client.board().is_none());
    }

    #[test]
    fn test_attempt_carries_round_index() {
        let mut client = ClientSync::new(library());
        assert!(client.attempt(ZoneId(0), ZoneId(1)).is_none());

        client.apply(&ServerMessage::RoundStart(RoundStart {
            seed: 9,
            template_ref: "mixed-4x3".into(),
            round_index: 1,
        }));
        assert_eq!(
            client.attempt(ZoneId(3), ZoneId(4)),
            Some(ClientMessage::AttemptPair {
                zone_a: ZoneId(3),
                zone_b: ZoneId(4),
                round_index: Some(1),
            })
        );
    }

    #[test]
    fn test_session_end_clears_round() {
        let (_, effects) = started_room();
        let mut client = ClientSync::new(library());
        for msg in inbox(&effects, pid(1)) {
            client.apply(&msg);
        }
        assert!(client.is_host());
        assert!(client.board().is_some());

        let end = ServerMessage::SessionEnd {
            winner: None,
            per_player_scores: Vec::new(),
            session_id: uuid::Uuid::nil(),
        };
        assert_eq!(client.apply(&end), SyncOutcome::SessionEnded);
        assert!(client.board().is_none());
        assert_eq!(client.apply(&ServerMessage::Pong { timestamp: 1, server_time: 2 }), SyncOutcome::Ignored);
    }

    #[test]
    fn test_solo_round_is_reproducible_from_its_seed() {
        let client = ClientSync::new(library());
        let board = client.solo_round().unwrap();
        let again = library()
            .compute_round(board.seed, &board.template_id, &FilterConfig::default())
            .unwrap();
        assert_eq!(board.hash(), again.hash());
    }
}
