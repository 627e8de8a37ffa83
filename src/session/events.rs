//! Room events and effects.
//!
//! Events are everything that can happen to a room: player requests
//! (already authenticated to a connection) and timer firings. Effects are
//! what the room wants done in response; the room itself never touches a
//! socket or a clock.

use std::time::Duration;

use crate::catalog::FilterConfig;
use crate::engine::template::ZoneId;
use crate::network::protocol::ServerMessage;
use super::history::SessionRecord;
use super::player::PlayerId;
use super::room::{JoinError, RoundLimit};

/// Generation token of a scheduled timer.
pub type TimerToken = u64;

/// Per-room timers. At most one of each kind is pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// 1 s countdown tick before the first round.
    Countdown,
    /// Round duration.
    Round,
    /// Delay between a round's result and the next round.
    Reveal,
    /// Empty-room teardown grace period.
    Grace,
}

/// Input to the room state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// A connection asks to join.
    Join {
        /// Connection's player id.
        player: PlayerId,
        /// Requested nickname.
        nickname: String,
    },
    /// A player leaves voluntarily.
    Leave {
        /// Leaving player.
        player: PlayerId,
    },
    /// A player's connection dropped.
    Disconnect {
        /// Player whose connection dropped.
        player: PlayerId,
    },
    /// Ready flag change.
    ToggleReady {
        /// Requesting player.
        player: PlayerId,
        /// New ready flag.
        ready: bool,
    },
    /// Host starts the session.
    Start {
        /// Requesting player; must be host.
        player: PlayerId,
    },
    /// Host changes the round limit.
    SetRounds {
        /// Requesting player; must be host.
        player: PlayerId,
        /// New limit.
        rounds: RoundLimit,
    },
    /// Host changes the content filter.
    SetFilter {
        /// Requesting player; must be host.
        player: PlayerId,
        /// New filter.
        filter: FilterConfig,
    },
    /// A pair claim.
    Attempt {
        /// Claiming player.
        player: PlayerId,
        /// First zone.
        zone_a: ZoneId,
        /// Second zone.
        zone_b: ZoneId,
        /// Round the client believes is active.
        round_index: Option<u32>,
    },
    /// Host ends the session.
    EndSession {
        /// Requesting player; must be host.
        player: PlayerId,
    },
    /// Resynchronization request.
    SyncRequest {
        /// Requesting player.
        player: PlayerId,
    },
    /// Session history request.
    HistoryRequest {
        /// Requesting player.
        player: PlayerId,
    },
    /// Countdown timer fired.
    CountdownTick {
        /// Generation of the fired timer.
        token: TimerToken,
    },
    /// Round timer fired.
    RoundTimeout {
        /// Generation of the fired timer.
        token: TimerToken,
    },
    /// Reveal delay elapsed.
    RevealElapsed {
        /// Generation of the fired timer.
        token: TimerToken,
    },
    /// Empty-room grace period elapsed.
    GraceExpired {
        /// Generation of the fired timer.
        token: TimerToken,
    },
}

impl RoomEvent {
    /// Event delivered when a timer with this kind and token fires.
    pub fn timer_fired(kind: TimerKind, token: TimerToken) -> Self {
        match kind {
            TimerKind::Countdown => RoomEvent::CountdownTick { token },
            TimerKind::Round => RoomEvent::RoundTimeout { token },
            TimerKind::Reveal => RoomEvent::RevealElapsed { token },
            TimerKind::Grace => RoomEvent::GraceExpired { token },
        }
    }
}

/// Output of the room state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Message to one player.
    Send {
        /// Recipient.
        to: PlayerId,
        /// Message.
        msg: ServerMessage,
    },
    /// Message to every player in the room.
    Broadcast(ServerMessage),
    /// A join was refused; answer the requester only.
    JoinRejected {
        /// Refused connection.
        player: PlayerId,
        /// Reason.
        error: JoinError,
    },
    /// Start (or restart) a timer.
    ScheduleTimer {
        /// Which timer.
        timer: TimerKind,
        /// Delay until it fires.
        after: Duration,
        /// Generation the firing must carry.
        token: TimerToken,
    },
    /// Abort a pending timer.
    CancelTimer(TimerKind),
    /// Persist a finished session.
    AppendHistory(SessionRecord),
    /// The room is empty and its grace period is over.
    TearDown,
}

impl Effect {
    /// The message carried by a send or broadcast.
    pub fn message(&self) -> Option<&ServerMessage> {
        match self {
            Effect::Send { msg, .. } | Effect::Broadcast(msg) => Some(msg),
            _ => None,
        }
    }
}
