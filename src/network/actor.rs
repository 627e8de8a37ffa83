//! Room Actor
//!
//! One tokio task per room. The task owns its [`Room`] and drains a mailbox
//! in arrival order, so the room has exactly one writer and concurrent
//! attempts are serialized by the channel. Timers are tasks that post their
//! firing back into the same mailbox.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::network::protocol::ServerMessage;
use crate::session::{
    Effect, HistoryStore, JoinError, PlayerId, Room, RoomEvent, TimerKind,
};

/// Mailbox depth per room.
const MAILBOX_CAPACITY: usize = 256;

/// Mailbox entry.
#[derive(Debug)]
pub enum RoomCommand {
    /// Join with an outbox for this player's messages; answered on `reply`.
    Join {
        /// Joining player.
        player: PlayerId,
        /// Requested nickname.
        nickname: String,
        /// Where to deliver the player's messages.
        outbox: mpsc::Sender<ServerMessage>,
        /// Join outcome.
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    /// Any other event.
    Event(RoomEvent),
}

/// Cloneable address of a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    code: String,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Room code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Join the room.
    pub async fn join(
        &self,
        player: PlayerId,
        nickname: String,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> Result<(), JoinError> {
        let (reply, rx) = oneshot::channel();
        let command = RoomCommand::Join {
            player,
            nickname,
            outbox,
            reply,
        };
        if self.tx.send(command).await.is_err() {
            return Err(JoinError::RoomNotFound(self.code.clone()));
        }
        rx.await
            .unwrap_or_else(|_| Err(JoinError::RoomNotFound(self.code.clone())))
    }

    /// Post an event. Returns false once the room is gone.
    pub async fn send(&self, event: RoomEvent) -> bool {
        self.tx.send(RoomCommand::Event(event)).await.is_ok()
    }

    /// Whether the room task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The task state of one room.
pub struct RoomActor {
    room: Room,
    mailbox: mpsc::Receiver<RoomCommand>,
    /// Weak so the mailbox closes once every handle is dropped.
    weak_tx: mpsc::WeakSender<RoomCommand>,
    outboxes: BTreeMap<PlayerId, mpsc::Sender<ServerMessage>>,
    timers: BTreeMap<TimerKind, JoinHandle<()>>,
    history: Arc<HistoryStore>,
}

impl RoomActor {
    /// Wrap a room; returns its handle and the actor to spawn.
    pub fn new(room: Room, history: Arc<HistoryStore>) -> (RoomHandle, Self) {
        let (tx, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = RoomHandle {
            code: room.code().to_owned(),
            tx: tx.clone(),
        };
        let actor = Self {
            room,
            mailbox,
            weak_tx: tx.downgrade(),
            outboxes: BTreeMap::new(),
            timers: BTreeMap::new(),
            history,
        };
        (handle, actor)
    }

    /// Spawn the actor on the runtime.
    pub fn spawn(room: Room, history: Arc<HistoryStore>) -> (RoomHandle, JoinHandle<()>) {
        let (handle, actor) = Self::new(room, history);
        (handle, tokio::spawn(actor.run()))
    }

    /// Drain the mailbox until teardown or until every handle is gone.
    pub async fn run(mut self) {
        let code = self.room.code().to_owned();
        info!("Room {} opened", code);

        while let Some(command) = self.mailbox.recv().await {
            let effects = self.dispatch(command);
            if self.apply(effects).await {
                break;
            }
        }

        for (_, timer) in std::mem::take(&mut self.timers) {
            timer.abort();
        }
        info!("Room {} closed", code);
    }

    fn dispatch(&mut self, command: RoomCommand) -> Vec<Effect> {
        match command {
            RoomCommand::Join {
                player,
                nickname,
                outbox,
                reply,
            } => {
                let effects = self.room.handle(RoomEvent::Join { player, nickname });
                let rejection = effects.iter().find_map(|e| match e {
                    Effect::JoinRejected { player: p, error } if *p == player => Some(error.clone()),
                    _ => None,
                });
                if rejection.is_none() {
                    self.outboxes.insert(player, outbox);
                }
                // The requester may have disconnected meanwhile.
                let _ = reply.send(rejection.map_or(Ok(()), Err));
                effects
            }
            RoomCommand::Event(event) => {
                if let RoomEvent::Leave { player } | RoomEvent::Disconnect { player } = &event {
                    self.outboxes.remove(player);
                }
                self.room.handle(event)
            }
        }
    }

    /// Carry out effects. Returns true when the room should shut down.
    async fn apply(&mut self, effects: Vec<Effect>) -> bool {
        let mut tear_down = false;
        for effect in effects {
            match effect {
                Effect::Send { to, msg } => self.deliver(to, msg),
                Effect::Broadcast(msg) => {
                    let players: Vec<PlayerId> = self.outboxes.keys().copied().collect();
                    for player in players {
                        self.deliver(player, msg.clone());
                    }
                }
                Effect::JoinRejected { .. } => {}
                Effect::ScheduleTimer { timer, after, token } => {
                    let Some(tx) = self.weak_tx.upgrade() else {
                        continue;
                    };
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx
                            .send(RoomCommand::Event(RoomEvent::timer_fired(timer, token)))
                            .await;
                    });
                    if let Some(previous) = self.timers.insert(timer, task) {
                        previous.abort();
                    }
                }
                Effect::CancelTimer(timer) => {
                    if let Some(task) = self.timers.remove(&timer) {
                        task.abort();
                    }
                }
                Effect::AppendHistory(record) => {
                    if let Err(e) = self.history.append(record).await {
                        error!("Room {}: failed to persist session: {}", self.room.code(), e);
                    }
                }
                Effect::TearDown => tear_down = true,
            }
        }
        tear_down
    }

    /// Queue a message without blocking the room on a slow client.
    fn deliver(&mut self, player: PlayerId, msg: ServerMessage) {
        let Some(outbox) = self.outboxes.get(&player) else {
            debug!("Room {}: no outbox for {}", self.room.code(), player);
            return;
        };
        match outbox.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Room {}: outbox of {} full, message dropped", self.room.code(), player);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Room {}: outbox of {} closed", self.room.code(), player);
                self.outboxes.remove(&player);
            }
        }
    }
}
