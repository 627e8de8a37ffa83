//! Room State Machine
//!
//! One room's lobby, rounds and session lifecycle as an explicit FSM:
//!
//! ```text
//! lobby ─start→ countdown ─ticks→ round-active ─win/timeout→ round-resolved
//!   ↑                                  ↑                          │
//!   │                                  └──────── reveal ──────────┤
//!   └──────────────────── session-ended ←── limit / host end ─────┘
//! ```
//!
//! `Room::handle` consumes one [`RoomEvent`] and returns the [`Effect`]s to
//! carry out. It owns no sockets and no clocks, so every rule here is
//! testable by feeding events in order. The server keeps one room per tokio
//! task, which makes the room single-writer.

use std::collections::BTreeMap;
use std::time::Duration;
use chrono::Utc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::FilterConfig;
use crate::engine::board::Board;
use crate::engine::library::{ContentStore, LibraryError};
use crate::engine::template::ZoneId;
use crate::network::protocol::{
    ErrorCode, PlayerInfo, RoomSnapshot, RoundStart, ServerMessage,
};
use super::events::{Effect, RoomEvent, TimerKind, TimerToken};
use super::history::{PlayerScore, SessionRecord};
use super::player::{clean_nickname, Player, PlayerId};
use super::scoring::{pick_winner, TieBreakPolicy};
use super::seed::{round_seed, SeedSource};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Rounds per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundLimit {
    /// Session ends after this many resolved or timed-out rounds.
    Finite(u32),
    /// Session runs until the host ends it.
    Infinite,
}

impl RoundLimit {
    /// Round count, `None` when endless.
    pub fn total(self) -> Option<u32> {
        match self {
            RoundLimit::Finite(n) => Some(n),
            RoundLimit::Infinite => None,
        }
    }

    /// Whether `played` rounds complete the session.
    pub fn reached(self, played: u32) -> bool {
        matches!(self, RoundLimit::Finite(n) if played >= n)
    }
}

/// Room timing and roster configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum players in a room.
    pub max_players: usize,
    /// Minimum players to start.
    pub min_players: usize,
    /// Countdown before the first round (seconds).
    pub countdown_secs: u32,
    /// Time to find the pair.
    pub round_duration: Duration,
    /// Pause between a round's result and the next round.
    pub reveal_duration: Duration,
    /// How long an empty room survives.
    pub empty_room_grace: Duration,
    /// Round limit of new rooms.
    pub default_rounds: RoundLimit,
    /// Session-end tie-break.
    pub tie_break: TieBreakPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 8,
            min_players: 2,
            countdown_secs: 3,
            round_duration: Duration::from_secs(60),
            reveal_duration: Duration::from_secs(3),
            empty_room_grace: Duration::from_secs(30),
            default_rounds: RoundLimit::Finite(5),
            tie_break: TieBreakPolicy::default(),
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Room status as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Waiting for players to ready up.
    Lobby,
    /// Counting down to the first round.
    Countdown,
    /// Rounds in progress.
    Playing,
}

/// Join refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// No room with that code.
    #[error("room {0} not found")]
    RoomNotFound(String),

    /// Roster is full.
    #[error("room is full")]
    RoomFull,

    /// Empty, too long, or contains control characters.
    #[error("invalid nickname")]
    InvalidNickname,

    /// Another player already uses it.
    #[error("nickname {0} is already taken")]
    NicknameTaken(String),
}

/// The round being played.
#[derive(Debug, Clone)]
struct ActiveRound {
    start: RoundStart,
    /// Server-side board; attempts are validated against it only.
    board: Board,
}

#[derive(Debug, Clone)]
enum Stage {
    Lobby,
    Countdown { remaining: u32 },
    RoundActive(ActiveRound),
    RoundResolved { index: u32 },
}

/// A room.
pub struct Room {
    code: String,
    config: SessionConfig,
    content: ContentStore,
    seeds: Box<dyn SeedSource>,
    /// Roster in join order; the first entry is the earliest joiner.
    players: Vec<Player>,
    host: Option<PlayerId>,
    stage: Stage,
    rounds: RoundLimit,
    rounds_played: u32,
    filter: FilterConfig,
    session_id: Uuid,
    current_seed: Option<u32>,
    /// Pending timers and their current generation.
    timers: BTreeMap<TimerKind, TimerToken>,
    next_token: TimerToken,
    /// Increments on every point scored; orders ties.
    score_seq: u64,
    history: Vec<SessionRecord>,
    sessions_ended: u32,
}

/// Functional form of [`Room::handle`].
pub fn transition(mut room: Room, event: RoomEvent) -> (Room, Vec<Effect>) {
    let effects = room.handle(event);
    (room, effects)
}

impl Room {
    /// Create an empty room in the lobby.
    pub fn new(
        code: impl Into<String>,
        config: SessionConfig,
        content: ContentStore,
        seeds: Box<dyn SeedSource>,
    ) -> Self {
        Self {
            code: code.into(),
            rounds: config.default_rounds,
            config,
            content,
            seeds,
            players: Vec::new(),
            host: None,
            stage: Stage::Lobby,
            rounds_played: 0,
            filter: FilterConfig::default(),
            session_id: Uuid::nil(),
            current_seed: None,
            timers: BTreeMap::new(),
            next_token: 0,
            score_seq: 0,
            history: Vec::new(),
            sessions_ended: 0,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Room code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Client-visible status.
    pub fn status(&self) -> RoomStatus {
        match self.stage {
            Stage::Lobby => RoomStatus::Lobby,
            Stage::Countdown { .. } => RoomStatus::Countdown,
            Stage::RoundActive(_) | Stage::RoundResolved { .. } => RoomStatus::Playing,
        }
    }

    /// Roster in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Current host.
    pub fn host(&self) -> Option<PlayerId> {
        self.host
    }

    /// Whether a player is in the roster.
    pub fn contains(&self, player: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == player)
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Rounds resolved or timed out this session.
    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    /// Round limit.
    pub fn round_limit(&self) -> RoundLimit {
        self.rounds
    }

    /// Content filter.
    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    /// Seed of the latest round.
    pub fn current_seed(&self) -> Option<u32> {
        self.current_seed
    }

    /// The active round announcement.
    pub fn active_round(&self) -> Option<&RoundStart> {
        match &self.stage {
            Stage::RoundActive(round) => Some(&round.start),
            _ => None,
        }
    }

    /// Server-side board of the active round.
    pub fn current_board(&self) -> Option<&Board> {
        match &self.stage {
            Stage::RoundActive(round) => Some(&round.board),
            _ => None,
        }
    }

    /// Finished sessions of this room.
    pub fn history(&self) -> &[SessionRecord] {
        &self.history
    }

    /// Number of sessions ended since the room was created.
    pub fn sessions_ended(&self) -> u32 {
        self.sessions_ended
    }

    /// Pending timers.
    pub fn pending_timers(&self) -> impl Iterator<Item = (TimerKind, TimerToken)> + '_ {
        self.timers.iter().map(|(k, t)| (*k, *t))
    }

    /// `room.state` payload.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            status: self.status(),
            players: self
                .players
                .iter()
                .map(|p| PlayerInfo {
                    id: p.id,
                    nickname: p.nickname.clone(),
                    ready: p.ready,
                    score: p.score,
                    is_host: self.host == Some(p.id),
                })
                .collect(),
            rounds_per_session: self.rounds.total(),
            rounds_played: self.rounds_played,
            filter: self.filter.clone(),
            catalog_version: self.content.current().version().to_owned(),
        }
    }

    /// Scores in roster order.
    pub fn scores(&self) -> Vec<PlayerScore> {
        self.players.iter().map(score_of).collect()
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Apply one event.
    pub fn handle(&mut self, event: RoomEvent) -> Vec<Effect> {
        match event {
            RoomEvent::Join { player, nickname } => self.on_join(player, &nickname),
            RoomEvent::Leave { player } => self.on_leave(player, "left"),
            RoomEvent::Disconnect { player } => self.on_leave(player, "disconnected"),
            RoomEvent::ToggleReady { player, ready } => self.on_ready(player, ready),
            RoomEvent::Start { player } => self.on_start(player),
            RoomEvent::SetRounds { player, rounds } => self.on_set_rounds(player, rounds),
            RoomEvent::SetFilter { player, filter } => self.on_set_filter(player, filter),
            RoomEvent::Attempt {
                player,
                zone_a,
                zone_b,
                round_index,
            } => self.on_attempt(player, zone_a, zone_b, round_index),
            RoomEvent::EndSession { player } => self.on_end_session(player),
            RoomEvent::SyncRequest { player } => self.on_sync(player),
            RoomEvent::HistoryRequest { player } => self.on_history(player),
            RoomEvent::CountdownTick { token } => self.on_countdown_tick(token),
            RoomEvent::RoundTimeout { token } => self.on_round_timeout(token),
            RoomEvent::RevealElapsed { token } => self.on_reveal_elapsed(token),
            RoomEvent::GraceExpired { token } => self.on_grace_expired(token),
        }
    }

    fn on_join(&mut self, player: PlayerId, nickname: &str) -> Vec<Effect> {
        if self.contains(player) {
            return vec![self.joined(player), self.send_state(player)];
        }

        let Some(nickname) = clean_nickname(nickname) else {
            return vec![reject(player, JoinError::InvalidNickname)];
        };
        if self.players.len() >= self.config.max_players {
            return vec![reject(player, JoinError::RoomFull)];
        }
        let lowered = nickname.to_lowercase();
        if self.players.iter().any(|p| p.nickname.to_lowercase() == lowered) {
            return vec![reject(player, JoinError::NicknameTaken(nickname))];
        }

        let mut effects = Vec::new();
        effects.extend(self.cancel(TimerKind::Grace));

        info!("Room {}: {} joined as {}", self.code, player, nickname);
        self.players.push(Player::new(player, nickname));
        if self.host.is_none() {
            self.host = Some(player);
        }

        effects.push(self.joined(player));
        effects.push(self.broadcast_state());
        effects.extend(self.catch_up(player));
        effects
    }

    fn on_leave(&mut self, player: PlayerId, how: &str) -> Vec<Effect> {
        let Some(pos) = self.players.iter().position(|p| p.id == player) else {
            return Vec::new();
        };
        let left = self.players.remove(pos);
        info!("Room {}: {} ({}) {}", self.code, left.nickname, player, how);

        if self.host == Some(player) {
            self.host = self.players.first().map(|p| p.id);
            if let Some(host) = self.players.first() {
                info!("Room {}: host transferred to {}", self.code, host.nickname);
            }
        }

        let mut effects = Vec::new();

        if self.players.is_empty() {
            effects.extend(self.cancel_all());
            self.reset_to_lobby();
            effects.push(self.schedule(TimerKind::Grace, self.config.empty_room_grace));
            return effects;
        }

        if matches!(self.stage, Stage::Countdown { .. }) && self.players.len() < self.config.min_players {
            info!("Room {}: countdown aborted, not enough players", self.code);
            effects.extend(self.cancel(TimerKind::Countdown));
            self.stage = Stage::Lobby;
        }

        effects.push(self.broadcast_state());
        if self.status() != RoomStatus::Lobby {
            effects.push(self.broadcast_scores());
        }
        effects
    }

    fn on_ready(&mut self, player: PlayerId, ready: bool) -> Vec<Effect> {
        if !matches!(self.stage, Stage::Lobby) {
            debug!("Room {}: ready toggle outside lobby ignored", self.code);
            return Vec::new();
        }
        let Some(p) = self.players.iter_mut().find(|p| p.id == player) else {
            return Vec::new();
        };
        if p.ready == ready {
            return Vec::new();
        }
        p.ready = ready;
        vec![self.broadcast_state()]
    }

    fn on_start(&mut self, player: PlayerId) -> Vec<Effect> {
        if !self.contains(player) {
            return Vec::new();
        }
        if !matches!(self.stage, Stage::Lobby) {
            debug!("Room {}: start ignored, session already running", self.code);
            return Vec::new();
        }
        if let Err(rejection) = self.check_host(player) {
            return vec![rejection];
        }
        if self.players.len() < self.config.min_players {
            return vec![send_error(
                player,
                ErrorCode::NotReady,
                format!("At least {} players are needed", self.config.min_players),
            )];
        }
        if !self.players.iter().all(|p| p.ready) {
            return vec![send_error(player, ErrorCode::NotReady, "Not every player is ready")];
        }

        self.session_id = Uuid::new_v4();
        self.rounds_played = 0;
        self.score_seq = 0;
        for p in &mut self.players {
            p.score = 0;
            p.scored_at = 0;
        }
        info!(
            "Room {}: session {} starting with {} players",
            self.code,
            self.session_id,
            self.players.len()
        );

        if self.config.countdown_secs == 0 {
            return self.start_round();
        }

        let seconds = self.config.countdown_secs;
        self.stage = Stage::Countdown { remaining: seconds };
        vec![
            self.broadcast_state(),
            self.broadcast_scores(),
            Effect::Broadcast(ServerMessage::Countdown { seconds_remaining: seconds }),
            self.schedule(TimerKind::Countdown, Duration::from_secs(1)),
        ]
    }

    fn on_set_rounds(&mut self, player: PlayerId, rounds: RoundLimit) -> Vec<Effect> {
        if let Err(rejection) = self.check_host(player) {
            return vec![rejection];
        }
        if !matches!(self.stage, Stage::Lobby) {
            return vec![send_error(player, ErrorCode::InvalidState, "Rounds can only change in the lobby")];
        }
        if rounds == RoundLimit::Finite(0) {
            return vec![send_error(player, ErrorCode::InvalidInput, "Round count must be positive")];
        }
        self.rounds = rounds;
        vec![self.broadcast_state()]
    }

    fn on_set_filter(&mut self, player: PlayerId, filter: FilterConfig) -> Vec<Effect> {
        if let Err(rejection) = self.check_host(player) {
            return vec![rejection];
        }
        if !matches!(self.stage, Stage::Lobby) {
            return vec![send_error(player, ErrorCode::InvalidState, "Filter can only change in the lobby")];
        }
        self.filter = filter;
        vec![self.broadcast_state()]
    }

    fn on_attempt(
        &mut self,
        player: PlayerId,
        zone_a: ZoneId,
        zone_b: ZoneId,
        round_index: Option<u32>,
    ) -> Vec<Effect> {
        let index = match &self.stage {
            Stage::RoundActive(round) => {
                let index = round.start.round_index;
                if !self.contains(player) {
                    debug!("Room {}: attempt from non-member {}", self.code, player);
                    return Vec::new();
                }
                if round_index.is_some_and(|i| i != index) {
                    debug!("Room {}: attempt for round {:?} during round {}", self.code, round_index, index);
                    return Vec::new();
                }
                if !round.board.is_winning_attempt(zone_a, zone_b) {
                    debug!("Room {}: {} tried {} / {}", self.code, player, zone_a, zone_b);
                    return Vec::new();
                }
                index
            }
            _ => {
                debug!("Room {}: attempt outside an active round", self.code);
                return Vec::new();
            }
        };

        self.score_seq += 1;
        let seq = self.score_seq;
        let Some(winner) = self.players.iter_mut().find(|p| p.id == player) else {
            return Vec::new();
        };
        winner.score += 1;
        winner.scored_at = seq;
        let (winner_id, winner_name) = (winner.id, winner.nickname.clone());

        self.rounds_played += 1;
        self.stage = Stage::RoundResolved { index };
        info!("Room {}: round {} won by {}", self.code, index, winner_name);

        let mut effects = Vec::new();
        effects.extend(self.cancel(TimerKind::Round));
        effects.push(Effect::Broadcast(ServerMessage::RoundResult {
            round_index: index,
            winner_id,
            winner_name,
        }));
        effects.push(self.broadcast_scores());
        effects.push(self.schedule(TimerKind::Reveal, self.config.reveal_duration));
        effects
    }

    fn on_end_session(&mut self, player: PlayerId) -> Vec<Effect> {
        if let Err(rejection) = self.check_host(player) {
            return vec![rejection];
        }
        if matches!(self.stage, Stage::Lobby) {
            debug!("Room {}: end requested with no session running", self.code);
            return Vec::new();
        }
        self.end_session()
    }

    fn on_sync(&mut self, player: PlayerId) -> Vec<Effect> {
        if !self.contains(player) {
            return Vec::new();
        }
        let mut effects = vec![
            self.send_state(player),
            Effect::Send {
                to: player,
                msg: ServerMessage::ScoreUpdate { scores: self.scores() },
            },
        ];
        effects.extend(self.catch_up(player));
        effects
    }

    fn on_history(&mut self, player: PlayerId) -> Vec<Effect> {
        if !self.contains(player) {
            return Vec::new();
        }
        vec![Effect::Send {
            to: player,
            msg: ServerMessage::SessionHistory {
                records: self.history.clone(),
            },
        }]
    }

    fn on_countdown_tick(&mut self, token: TimerToken) -> Vec<Effect> {
        if !self.accept_timer(TimerKind::Countdown, token) {
            return Vec::new();
        }
        let remaining = match self.stage {
            Stage::Countdown { remaining } => remaining.saturating_sub(1),
            _ => return Vec::new(),
        };

        if remaining == 0 {
            return self.start_round();
        }
        self.stage = Stage::Countdown { remaining };
        vec![
            Effect::Broadcast(ServerMessage::Countdown { seconds_remaining: remaining }),
            self.schedule(TimerKind::Countdown, Duration::from_secs(1)),
        ]
    }

    fn on_round_timeout(&mut self, token: TimerToken) -> Vec<Effect> {
        if !self.accept_timer(TimerKind::Round, token) {
            return Vec::new();
        }
        let index = match &self.stage {
            Stage::RoundActive(round) => round.start.round_index,
            _ => return Vec::new(),
        };

        self.rounds_played += 1;
        self.stage = Stage::RoundResolved { index };
        info!("Room {}: round {} timed out", self.code, index);

        vec![
            Effect::Broadcast(ServerMessage::RoundTimeout {
                round_index: index,
                rounds_total: self.rounds.total(),
            }),
            self.schedule(TimerKind::Reveal, self.config.reveal_duration),
        ]
    }

    fn on_reveal_elapsed(&mut self, token: TimerToken) -> Vec<Effect> {
        if !self.accept_timer(TimerKind::Reveal, token) {
            return Vec::new();
        }
        let Stage::RoundResolved { index } = self.stage else {
            return Vec::new();
        };
        debug!("Room {}: reveal of round {} over", self.code, index);
        if self.rounds.reached(self.rounds_played) {
            self.end_session()
        } else {
            self.start_round()
        }
    }

    fn on_grace_expired(&mut self, token: TimerToken) -> Vec<Effect> {
        if !self.accept_timer(TimerKind::Grace, token) || !self.players.is_empty() {
            return Vec::new();
        }
        info!("Room {}: empty past grace period, tearing down", self.code);
        vec![Effect::TearDown]
    }

    // =========================================================================
    // ROUNDS AND SESSIONS
    // =========================================================================

    fn start_round(&mut self) -> Vec<Effect> {
        let index = self.rounds_played;
        let seed = round_seed(self.seeds.as_mut(), self.session_id.as_bytes(), index);

        // Snapshot: a catalog refresh never affects a running round.
        let library = self.content.current();
        let prepared = library.select_template(seed).and_then(|template_ref| {
            let board = library.compute_round(seed, template_ref, &self.filter)?;
            Ok((template_ref.to_owned(), board))
        });
        let (template_ref, board) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return self.abort_session(e),
        };

        if !board.status.is_clean() {
            warn!(
                "Room {}: round {} board seed={:08x} has issues: {:?}",
                self.code, index, seed, board.status.issues
            );
        }
        if board.committed.is_none() {
            warn!("Room {}: round {} has no correct pair and can only time out", self.code, index);
        }

        let start = RoundStart {
            seed,
            template_ref,
            round_index: index,
        };
        info!(
            "Room {}: round {} seed={:08x} template={}",
            self.code, index, seed, start.template_ref
        );

        self.current_seed = Some(seed);
        self.stage = Stage::RoundActive(ActiveRound {
            start: start.clone(),
            board,
        });

        vec![
            self.broadcast_state(),
            Effect::Broadcast(ServerMessage::RoundStart(start)),
            self.schedule(TimerKind::Round, self.config.round_duration),
        ]
    }

    fn end_session(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_all();

        let winner = pick_winner(&self.players, self.config.tie_break).map(score_of);
        let scores = self.scores();
        let record = SessionRecord {
            room_code: self.code.clone(),
            session_id: self.session_id,
            ended_at: Utc::now(),
            winner: winner.clone(),
            per_player_scores: scores.clone(),
            rounds_played: self.rounds_played,
        };
        self.history.push(record.clone());
        self.sessions_ended += 1;

        info!(
            "Room {}: session {} ended after {} rounds, winner {}",
            self.code,
            self.session_id,
            self.rounds_played,
            winner.as_ref().map(|w| w.nickname.as_str()).unwrap_or("none")
        );

        effects.push(Effect::AppendHistory(record));
        effects.push(Effect::Broadcast(ServerMessage::SessionEnd {
            winner,
            per_player_scores: scores,
            session_id: self.session_id,
        }));
        effects.push(Effect::Broadcast(ServerMessage::SessionHistory {
            records: self.history.clone(),
        }));

        self.reset_to_lobby();
        for p in &mut self.players {
            p.ready = false;
        }
        effects.push(self.broadcast_state());
        effects
    }

    /// A round could not be prepared: back to the lobby, tell everyone.
    fn abort_session(&mut self, err: LibraryError) -> Vec<Effect> {
        error!("Room {}: cannot prepare round: {}", self.code, err);
        let mut effects = self.cancel_all();
        self.reset_to_lobby();
        effects.push(Effect::Broadcast(ServerMessage::error(
            ErrorCode::InternalError,
            "Round could not be prepared",
        )));
        effects.push(self.broadcast_state());
        effects
    }

    fn reset_to_lobby(&mut self) {
        self.stage = Stage::Lobby;
        self.rounds_played = 0;
        self.current_seed = None;
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    fn schedule(&mut self, timer: TimerKind, after: Duration) -> Effect {
        self.next_token += 1;
        let token = self.next_token;
        self.timers.insert(timer, token);
        Effect::ScheduleTimer { timer, after, token }
    }

    fn cancel(&mut self, timer: TimerKind) -> Option<Effect> {
        self.timers.remove(&timer).map(|_| Effect::CancelTimer(timer))
    }

    fn cancel_all(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.timers)
            .into_keys()
            .map(Effect::CancelTimer)
            .collect()
    }

    /// Whether a firing is the current generation of its timer.
    fn accept_timer(&mut self, timer: TimerKind, token: TimerToken) -> bool {
        if self.timers.get(&timer) == Some(&token) {
            self.timers.remove(&timer);
            true
        } else {
            debug!("Room {}: stale {:?} timer {} ignored", self.code, timer, token);
            false
        }
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    fn check_host(&self, player: PlayerId) -> Result<(), Effect> {
        if !self.contains(player) {
            return Err(send_error(player, ErrorCode::NotInRoom, "Not in this room"));
        }
        if self.host != Some(player) {
            return Err(send_error(player, ErrorCode::NotHost, "Only the host can do that"));
        }
        Ok(())
    }

    fn joined(&self, player: PlayerId) -> Effect {
        Effect::Send {
            to: player,
            msg: ServerMessage::RoomJoined {
                code: self.code.clone(),
                player_id: player,
            },
        }
    }

    fn send_state(&self, player: PlayerId) -> Effect {
        Effect::Send {
            to: player,
            msg: ServerMessage::RoomState(self.snapshot()),
        }
    }

    fn broadcast_state(&self) -> Effect {
        Effect::Broadcast(ServerMessage::RoomState(self.snapshot()))
    }

    fn broadcast_scores(&self) -> Effect {
        Effect::Broadcast(ServerMessage::ScoreUpdate { scores: self.scores() })
    }

    /// What a newcomer or resyncing player needs beyond `room.state`.
    fn catch_up(&self, player: PlayerId) -> Vec<Effect> {
        match &self.stage {
            Stage::Countdown { remaining } => vec![Effect::Send {
                to: player,
                msg: ServerMessage::Countdown {
                    seconds_remaining: *remaining,
                },
            }],
            Stage::RoundActive(round) => vec![Effect::Send {
                to: player,
                msg: ServerMessage::RoundStart(round.start.clone()),
            }],
            _ => Vec::new(),
        }
    }
}

fn score_of(p: &Player) -> PlayerScore {
    PlayerScore {
        player_id: p.id,
        nickname: p.nickname.clone(),
        score: p.score,
    }
}

fn reject(player: PlayerId, error: JoinError) -> Effect {
    Effect::JoinRejected { player, error }
}

fn send_error(player: PlayerId, code: ErrorCode, message: impl Into<String>) -> Effect {
    Effect::Send {
        to: player,
        msg: ServerMessage::error(code, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::engine::library::ContentLibrary;
    use crate::engine::template::TemplateRegistry;
    use crate::session::seed::tests::BrokenSource;
    use crate::session::seed::FixedEntropy;

    fn store() -> ContentStore {
        ContentStore::new(ContentLibrary::new(sample_catalog(), TemplateRegistry::builtin()))
    }

    fn room_with(config: SessionConfig) -> Room {
        Room::new("ABCDE", config, store(), Box::new(FixedEntropy([9; 32])))
    }

    fn room() -> Room {
        room_with(SessionConfig::default())
    }

    fn pid(n: u8) -> PlayerId {
        PlayerId::from_bytes([n; 16])
    }

    fn scheduled(effects: &[Effect], kind: TimerKind) -> Option<TimerToken> {
        effects.iter().rev().find_map(|e| match e {
            Effect::ScheduleTimer { timer, token, .. } if *timer == kind => Some(*token),
            _ => None,
        })
    }

    fn broadcasts<'a>(effects: &'a [Effect]) -> impl Iterator<Item = &'a ServerMessage> {
        effects.iter().filter_map(|e| match e {
            Effect::Broadcast(msg) => Some(msg),
            _ => None,
        })
    }

    /// Room with `n` joined, ready players; player 1 is host.
    fn lobby(n: u8) -> Room {
        let mut room = room();
        for i in 1..=n {
            room.handle(RoomEvent::Join {
                player: pid(i),
                nickname: format!("p{}", i),
            });
            room.handle(RoomEvent::ToggleReady { player: pid(i), ready: true });
        }
        room
    }

    /// Start and run the countdown; returns the first round's effects.
    fn start(room: &mut Room) -> Vec<Effect> {
        let mut effects = room.handle(RoomEvent::Start { player: pid(1) });
        while let Some(token) = scheduled(&effects, TimerKind::Countdown) {
            effects = room.handle(RoomEvent::CountdownTick { token });
        }
        effects
    }

    fn win(room: &mut Room, player: PlayerId) -> Vec<Effect> {
        let (a, b) = room.current_board().unwrap().correct_pair().unwrap();
        room.handle(RoomEvent::Attempt {
            player,
            zone_a: a,
            zone_b: b,
            round_index: None,
        })
    }

    #[test]
    fn test_first_joiner_is_host() {
        let mut room = room();
        let effects = room.handle(RoomEvent::Join { player: pid(1), nickname: " ana ".into() });

        assert_eq!(room.host(), Some(pid(1)));
        assert_eq!(room.players()[0].nickname, "ana");
        assert!(matches!(
            &effects[0],
            Effect::Send { to, msg: ServerMessage::RoomJoined { code, .. } } if *to == pid(1) && code == "ABCDE"
        ));
        let state = broadcasts(&effects).find_map(|m| match m {
            ServerMessage::RoomState(s) => Some(s.clone()),
            _ => None,
        });
        let state = state.unwrap();
        assert_eq!(state.status, RoomStatus::Lobby);
        assert!(state.players[0].is_host);
        assert_eq!(state.rounds_per_session, Some(5));
        assert_eq!(state.catalog_version.len(), 64);
    }

    #[test]
    fn test_join_rejections() {
        let mut room = room_with(SessionConfig { max_players: 2, ..Default::default() });
        room.handle(RoomEvent::Join { player: pid(1), nickname: "Ana".into() });

        let taken = room.handle(RoomEvent::Join { player: pid(2), nickname: "ana".into() });
        assert_eq!(
            taken,
            vec![Effect::JoinRejected { player: pid(2), error: JoinError::NicknameTaken("ana".into()) }]
        );

        let bad = room.handle(RoomEvent::Join { player: pid(2), nickname: "".into() });
        assert_eq!(bad, vec![Effect::JoinRejected { player: pid(2), error: JoinError::InvalidNickname }]);

        room.handle(RoomEvent::Join { player: pid(2), nickname: "Bo".into() });
        let full = room.handle(RoomEvent::Join { player: pid(3), nickname: "Cy".into() });
        assert_eq!(full, vec![Effect::JoinRejected { player: pid(3), error: JoinError::RoomFull }]);
        assert_eq!(room.players().len(), 2);
    }

    #[test]
    fn test_start_requirements() {
        let mut room = room();
        room.handle(RoomEvent::Join { player: pid(1), nickname: "a".into() });
        room.handle(RoomEvent::ToggleReady { player: pid(1), ready: true });

        // Alone.
        let effects = room.handle(RoomEvent::Start { player: pid(1) });
        assert!(matches!(
            effects[0].message(),
            Some(ServerMessage::Error(e)) if e.code == ErrorCode::NotReady
        ));

        room.handle(RoomEvent::Join { player: pid(2), nickname: "b".into() });
        // Not everyone ready.
        let effects = room.handle(RoomEvent::Start { player: pid(1) });
        assert!(matches!(
            effects[0].message(),
            Some(ServerMessage::Error(e)) if e.code == ErrorCode::NotReady
        ));

        room.handle(RoomEvent::ToggleReady { player: pid(2), ready: true });
        // Not host.
        let effects = room.handle(RoomEvent::Start { player: pid(2) });
        assert!(matches!(
            effects[0].message(),
            Some(ServerMessage::Error(e)) if e.code == ErrorCode::NotHost
        ));
        assert_eq!(room.status(), RoomStatus::Lobby);

        let effects = room.handle(RoomEvent::Start { player: pid(1) });
        assert_eq!(room.status(), RoomStatus::Countdown);
        assert!(broadcasts(&effects).any(|m| *m == ServerMessage::Countdown { seconds_remaining: 3 }));
        assert!(scheduled(&effects, TimerKind::Countdown).is_some());
    }

    #[test]
    fn test_countdown_leads_to_round_start() {
        let mut room = lobby(2);
        let effects = start(&mut room);

        assert_eq!(room.status(), RoomStatus::Playing);
        let round = room.active_round().cloned().unwrap();
        assert_eq!(round.round_index, 0);
        assert_eq!(room.current_seed(), Some(round.seed));
        assert!(broadcasts(&effects).any(|m| *m == ServerMessage::RoundStart(round.clone())));
        assert!(scheduled(&effects, TimerKind::Round).is_some());

        // The server board is what every client computes.
        let library = store().current();
        let client = library
            .compute_round(round.seed, &round.template_ref, &FilterConfig::default())
            .unwrap();
        assert_eq!(client.hash(), room.current_board().unwrap().hash());
    }

    #[test]
    fn test_duplicate_start_is_noop() {
        let mut room = lobby(2);
        room.handle(RoomEvent::Start { player: pid(1) });
        assert!(room.handle(RoomEvent::Start { player: pid(1) }).is_empty());

        start(&mut room);
        let seed = room.current_seed();
        assert!(room.handle(RoomEvent::Start { player: pid(1) }).is_empty());
        assert_eq!(room.current_seed(), seed);
        assert_eq!(room.status(), RoomStatus::Playing);
    }

    #[test]
    fn test_round_exclusivity() {
        let mut room = lobby(2);
        start(&mut room);

        // Both claim the true pair; arrival order decides.
        let (a, b) = room.current_board().unwrap().correct_pair().unwrap();
        let first = win(&mut room, pid(2));
        let second = room.handle(RoomEvent::Attempt { player: pid(1), zone_a: a, zone_b: b, round_index: None });

        let results: Vec<&ServerMessage> = broadcasts(&first)
            .chain(broadcasts(&second))
            .filter(|m| matches!(m, ServerMessage::RoundResult { .. }))
            .collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            ServerMessage::RoundResult { winner_id, winner_name, round_index: 0 } if *winner_id == pid(2) && winner_name == "p2"
        ));
        assert!(second.is_empty());

        let scores: Vec<u32> = room.players().iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![0, 1]);
        assert!(first.contains(&Effect::CancelTimer(TimerKind::Round)));
    }

    #[test]
    fn test_stale_round_timeout_after_win_is_ignored() {
        let mut room = lobby(2);
        let effects = start(&mut room);
        let round_token = scheduled(&effects, TimerKind::Round).unwrap();

        win(&mut room, pid(1));
        assert!(room.handle(RoomEvent::RoundTimeout { token: round_token }).is_empty());
        assert_eq!(room.rounds_played(), 1);
    }

    #[test]
    fn test_bad_attempts_do_not_mutate() {
        let mut room = lobby(2);
        start(&mut room);
        let board = room.current_board().unwrap().clone();
        let (a, b) = board.correct_pair().unwrap();
        let wrong = board.zones.iter().map(|z| z.id).find(|z| *z != a && *z != b).unwrap();

        let attempts = [
            (pid(1), a, a, None),
            (pid(1), a, wrong, None),
            (pid(1), ZoneId(999), b, None),
            (pid(1), a, b, Some(7)),
            (pid(9), a, b, None),
        ];
        for (player, zone_a, zone_b, round_index) in attempts {
            let effects = room.handle(RoomEvent::Attempt { player, zone_a, zone_b, round_index });
            assert!(effects.is_empty());
        }
        assert!(room.players().iter().all(|p| p.score == 0));
        assert_eq!(room.rounds_played(), 0);
        assert_eq!(room.status(), RoomStatus::Playing);
    }

    #[test]
    fn test_session_terminates_after_round_limit() {
        let mut room = lobby(2);
        room.handle(RoomEvent::SetRounds { player: pid(1), rounds: RoundLimit::Finite(3) });

        let mut all = start(&mut room);

        // Round 0 and 1 won by p1, round 2 times out.
        for _ in 0..2 {
            let effects = win(&mut room, pid(1));
            let reveal = scheduled(&effects, TimerKind::Reveal).unwrap();
            all.extend(effects);
            all.extend(room.handle(RoomEvent::RevealElapsed { token: reveal }));
        }
        let round_token = scheduled(&all, TimerKind::Round).unwrap();
        let effects = room.handle(RoomEvent::RoundTimeout { token: round_token });
        assert!(broadcasts(&effects).any(|m| matches!(
            m,
            ServerMessage::RoundTimeout { round_index: 2, rounds_total: Some(3) }
        )));
        let reveal = scheduled(&effects, TimerKind::Reveal).unwrap();
        all.extend(effects);
        let end = room.handle(RoomEvent::RevealElapsed { token: reveal });
        all.extend(end.clone());

        // Replaying every token afterwards changes nothing.
        for (kind, token) in all.iter().filter_map(|e| match e {
            Effect::ScheduleTimer { timer, token, .. } => Some((*timer, *token)),
            _ => None,
        }) {
            assert!(room.handle(RoomEvent::timer_fired(kind, token)).is_empty());
        }

        let ends: Vec<&ServerMessage> = broadcasts(&all)
            .filter(|m| matches!(m, ServerMessage::SessionEnd { .. }))
            .collect();
        assert_eq!(ends.len(), 1);
        let ServerMessage::SessionEnd { winner, per_player_scores, .. } = ends[0] else {
            unreachable!();
        };
        assert_eq!(winner.as_ref().unwrap().player_id, pid(1));
        assert_eq!(per_player_scores.iter().map(|s| s.score).collect::<Vec<_>>(), vec![2, 0]);

        assert_eq!(room.sessions_ended(), 1);
        assert_eq!(room.status(), RoomStatus::Lobby);
        assert_eq!(room.history().len(), 1);
        assert_eq!(room.history()[0].rounds_played, 3);
        assert!(end.iter().any(|e| matches!(e, Effect::AppendHistory(_))));
        assert!(room.players().iter().all(|p| !p.ready));
    }

    #[test]
    fn test_host_disconnect_mid_round() {
        let mut room = lobby(3);
        start(&mut room);

        let effects = room.handle(RoomEvent::Disconnect { player: pid(1) });
        assert_eq!(room.host(), Some(pid(2)));
        assert_eq!(room.status(), RoomStatus::Playing);

        let state = broadcasts(&effects)
            .find_map(|m| match m {
                ServerMessage::RoomState(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.host().map(|h| h.id), Some(pid(2)));
        assert_eq!(state.status, RoomStatus::Playing);
        assert!(room.current_board().is_some());
    }

    #[test]
    fn test_host_only_controls() {
        let mut room = lobby(2);
        let effects = room.handle(RoomEvent::SetRounds { player: pid(2), rounds: RoundLimit::Infinite });
        assert!(matches!(effects[0].message(), Some(ServerMessage::Error(e)) if e.code == ErrorCode::NotHost));

        room.handle(RoomEvent::SetRounds { player: pid(1), rounds: RoundLimit::Infinite });
        assert_eq!(room.round_limit(), RoundLimit::Infinite);
        assert_eq!(room.snapshot().rounds_per_session, None);

        let filter = FilterConfig::default().with_theme("animals");
        room.handle(RoomEvent::SetFilter { player: pid(1), filter: filter.clone() });
        assert_eq!(room.filter(), &filter);

        let zero = room.handle(RoomEvent::SetRounds { player: pid(1), rounds: RoundLimit::Finite(0) });
        assert!(matches!(zero[0].message(), Some(ServerMessage::Error(e)) if e.code == ErrorCode::InvalidInput));
    }

    #[test]
    fn test_host_ends_infinite_session() {
        let mut room = lobby(2);
        room.handle(RoomEvent::SetRounds { player: pid(1), rounds: RoundLimit::Infinite });
        start(&mut room);
        win(&mut room, pid(2));

        let denied = room.handle(RoomEvent::EndSession { player: pid(2) });
        assert!(matches!(denied[0].message(), Some(ServerMessage::Error(e)) if e.code == ErrorCode::NotHost));

        let effects = room.handle(RoomEvent::EndSession { player: pid(1) });
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::Reveal)));
        assert!(broadcasts(&effects).any(|m| matches!(
            m,
            ServerMessage::SessionEnd { winner: Some(w), .. } if w.player_id == pid(2)
        )));
        assert_eq!(room.status(), RoomStatus::Lobby);
        assert_eq!(room.pending_timers().count(), 0);
    }

    #[test]
    fn test_filter_reaches_server_board() {
        let mut room = lobby(2);
        let filter = FilterConfig::default().with_theme("space");
        room.handle(RoomEvent::SetFilter { player: pid(1), filter: filter.clone() });
        start(&mut room);

        let round = room.active_round().cloned().unwrap();
        let board = room.current_board().unwrap();
        let library = store().current();
        let expected = library.compute_round(round.seed, &round.template_ref, &filter).unwrap();
        assert_eq!(board.hash(), expected.hash());
    }

    #[test]
    fn test_empty_room_grace_and_rejoin() {
        let mut room = lobby(2);
        start(&mut room);

        room.handle(RoomEvent::Leave { player: pid(1) });
        let effects = room.handle(RoomEvent::Leave { player: pid(2) });
        assert!(room.is_empty());
        assert_eq!(room.status(), RoomStatus::Lobby);
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::Round)));
        let grace = scheduled(&effects, TimerKind::Grace).unwrap();

        // Rejoin cancels teardown.
        let effects = room.handle(RoomEvent::Join { player: pid(3), nickname: "back".into() });
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::Grace)));
        assert_eq!(room.host(), Some(pid(3)));
        assert!(room.handle(RoomEvent::GraceExpired { token: grace }).is_empty());

        let effects = room.handle(RoomEvent::Leave { player: pid(3) });
        let grace = scheduled(&effects, TimerKind::Grace).unwrap();
        assert_eq!(room.handle(RoomEvent::GraceExpired { token: grace }), vec![Effect::TearDown]);
    }

    #[test]
    fn test_countdown_aborts_below_minimum() {
        let mut room = lobby(2);
        let effects = room.handle(RoomEvent::Start { player: pid(1) });
        let token = scheduled(&effects, TimerKind::Countdown).unwrap();

        let effects = room.handle(RoomEvent::Leave { player: pid(2) });
        assert!(effects.contains(&Effect::CancelTimer(TimerKind::Countdown)));
        assert_eq!(room.status(), RoomStatus::Lobby);
        assert!(room.handle(RoomEvent::CountdownTick { token }).is_empty());
    }

    #[test]
    fn test_sync_request_during_round() {
        let mut room = lobby(2);
        start(&mut room);
        let round = room.active_round().cloned().unwrap();

        let effects = room.handle(RoomEvent::SyncRequest { player: pid(2) });
        assert_eq!(effects.len(), 3);
        assert!(effects.iter().all(|e| matches!(e, Effect::Send { to, .. } if *to == pid(2))));
        assert!(matches!(effects[0].message(), Some(ServerMessage::RoomState(s)) if s.status == RoomStatus::Playing));
        assert_eq!(effects[2].message(), Some(&ServerMessage::RoundStart(round)));
    }

    #[test]
    fn test_late_joiner_gets_current_round() {
        let mut room = lobby(2);
        start(&mut room);
        let round = room.active_round().cloned().unwrap();

        let effects = room.handle(RoomEvent::Join { player: pid(5), nickname: "late".into() });
        assert!(effects.contains(&Effect::Send {
            to: pid(5),
            msg: ServerMessage::RoundStart(round),
        }));
    }

    #[test]
    fn test_history_request() {
        let mut room = lobby(2);
        start(&mut room);
        room.handle(RoomEvent::EndSession { player: pid(1) });

        let effects = room.handle(RoomEvent::HistoryRequest { player: pid(2) });
        assert!(matches!(
            effects[0].message(),
            Some(ServerMessage::SessionHistory { records }) if records.len() == 1
        ));
    }

    #[test]
    fn test_seed_source_failure_does_not_block() {
        let mut room = Room::new("ZZZZZ", SessionConfig::default(), store(), Box::new(BrokenSource));
        for i in 1..=2 {
            room.handle(RoomEvent::Join { player: pid(i), nickname: format!("p{}", i) });
            room.handle(RoomEvent::ToggleReady { player: pid(i), ready: true });
        }
        start(&mut room);
        assert_eq!(room.status(), RoomStatus::Playing);
        assert!(room.active_round().is_some());
    }

    #[test]
    fn test_transition_function() {
        let room = room();
        let (room, effects) = transition(room, RoomEvent::Join { player: pid(1), nickname: "a".into() });
        assert!(!effects.is_empty());
        assert!(room.contains(pid(1)));

        let (room, effects) = transition(room, RoomEvent::Leave { player: pid(9) });
        assert!(effects.is_empty());
        assert_eq!(room.players().len(), 1);
    }

    #[test]
    fn test_tie_break_policy_applies() {
        let config = SessionConfig {
            tie_break: TieBreakPolicy::NoWinner,
            default_rounds: RoundLimit::Finite(2),
            ..Default::default()
        };
        let mut room = room_with(config);
        for i in 1..=2 {
            room.handle(RoomEvent::Join { player: pid(i), nickname: format!("p{}", i) });
            room.handle(RoomEvent::ToggleReady { player: pid(i), ready: true });
        }
        start(&mut room);

        let effects = win(&mut room, pid(1));
        let reveal = scheduled(&effects, TimerKind::Reveal).unwrap();
        room.handle(RoomEvent::RevealElapsed { token: reveal });
        let effects = win(&mut room, pid(2));
        let reveal = scheduled(&effects, TimerKind::Reveal).unwrap();
        let end = room.handle(RoomEvent::RevealElapsed { token: reveal });

        assert!(broadcasts(&end).any(|m| matches!(m, ServerMessage::SessionEnd { winner: None, .. })));
    }
}
