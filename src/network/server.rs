//! WebSocket Game Server
//!
//! Async WebSocket server for room connections. Each connection gets a
//! player id, an outbox task and a reader loop; requests are routed into
//! the connection's room actor.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::engine::library::{ContentLibrary, ContentStore, LibraryError};
use crate::network::actor::RoomHandle;
use crate::network::manager::RoomManager;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::session::player::clean_nickname;
use crate::session::{HistoryError, HistoryStore, PlayerId, RoomEvent, SessionConfig};

/// Per-connection outbox depth.
const OUTBOX_CAPACITY: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are closed.
    pub idle_timeout: Duration,
    /// Catalog JSON (empty catalog when unset).
    pub catalog_path: Option<PathBuf>,
    /// Template JSON (built-in templates when unset).
    pub templates_path: Option<PathBuf>,
    /// Session history log (in memory when unset).
    pub history_path: Option<PathBuf>,
    /// Room settings.
    pub session: SessionConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            catalog_path: None,
            templates_path: None,
            history_path: None,
            session: SessionConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `MATCHBOARD_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GameServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bind) = lookup("MATCHBOARD_BIND") {
            config.bind_addr = bind
                .parse()
                .map_err(|_| GameServerError::Config(format!("MATCHBOARD_BIND: bad address {:?}", bind)))?;
        }
        if let Some(max) = lookup("MATCHBOARD_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| GameServerError::Config(format!("MATCHBOARD_MAX_CONNECTIONS: bad number {:?}", max)))?;
        }
        config.catalog_path = lookup("MATCHBOARD_CATALOG").map(PathBuf::from);
        config.templates_path = lookup("MATCHBOARD_TEMPLATES").map(PathBuf::from);
        config.history_path = lookup("MATCHBOARD_HISTORY").map(PathBuf::from);

        Ok(config)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Content could not be loaded.
    #[error("Content error: {0}")]
    Content(#[from] LibraryError),

    /// History log could not be opened.
    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

/// Connected client bookkeeping.
#[derive(Debug, Clone)]
struct ConnectedClient {
    player_id: PlayerId,
    room_code: Option<String>,
    connected_at: Instant,
}

/// A connection's view of its room membership.
struct Connection {
    addr: SocketAddr,
    player_id: PlayerId,
    room: Option<RoomHandle>,
    outbox: mpsc::Sender<ServerMessage>,
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server over already loaded content and history.
    pub fn new(config: ServerConfig, content: ContentStore, history: Arc<HistoryStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let rooms = Arc::new(RoomManager::new(content, history, config.session.clone()));

        Self {
            config,
            rooms,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Load content and history named by the config, then create the server.
    pub async fn from_config(config: ServerConfig) -> Result<Self, GameServerError> {
        let library = ContentLibrary::load(
            config.catalog_path.as_deref(),
            config.templates_path.as_deref(),
        )?;
        info!(
            "Content loaded: catalog {} with {} templates",
            &library.version()[..12],
            library.templates().len()
        );
        let history = match &config.history_path {
            Some(path) => HistoryStore::open(path).await?,
            None => HistoryStore::in_memory(),
        };
        Ok(Self::new(config, ContentStore::new(library), Arc::new(history)))
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from a bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let rooms = self.rooms.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);
            let player_id = PlayerId::new_v4();

            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    player_id,
                    room_code: None,
                    connected_at: Instant::now(),
                });
            }

            // Outbox writer
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut conn = Connection {
                addr,
                player_id,
                room: None,
                outbox: msg_tx.clone(),
            };
            let mut last_activity = Instant::now();

            loop {
                let idle_deadline = tokio::time::Instant::from_std(last_activity + idle_timeout);
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                last_activity = Instant::now();
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        Self::handle_client_message(&mut conn, client_msg, &rooms).await;
                                        let mut clients = clients.write().await;
                                        if let Some(client) = clients.get_mut(&addr) {
                                            client.room_code = conn.room.as_ref().map(|r| r.code().to_owned());
                                        }
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Binary frame from {} ignored", addr);
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                last_activity = Instant::now();
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = tokio::time::sleep_until(idle_deadline) => {
                        info!("Closing idle connection {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            if let Some(room) = conn.room.take() {
                room.send(RoomEvent::Disconnect { player: player_id }).await;
            }

            // Let queued messages (shutdown notice included) drain.
            drop(conn);
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Outbox of {} did not drain", addr);
            }

            let removed = clients.write().await.remove(&addr);
            if let Some(client) = removed {
                info!(
                    "Client {} ({}) cleaned up after {:?}",
                    addr,
                    client.player_id,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Route a client message.
    async fn handle_client_message(conn: &mut Connection, msg: ClientMessage, rooms: &Arc<RoomManager>) {
        match msg {
            ClientMessage::CreateRoom { nickname } => {
                if conn.room.is_some() {
                    conn.reply_error(ErrorCode::AlreadyInRoom, "Leave your room first").await;
                    return;
                }
                if clean_nickname(&nickname).is_none() {
                    conn.reply_error(ErrorCode::InvalidNickname, "Invalid nickname").await;
                    return;
                }
                let room = rooms.create().await;
                conn.join(room, nickname).await;
            }
            ClientMessage::JoinRoom { code, nickname } => {
                if conn.room.is_some() {
                    conn.reply_error(ErrorCode::AlreadyInRoom, "Leave your room first").await;
                    return;
                }
                match rooms.get(&code).await {
                    Some(room) => conn.join(room, nickname).await,
                    None => {
                        conn.reply_error(ErrorCode::RoomNotFound, format!("Room {} not found", code)).await;
                    }
                }
            }
            ClientMessage::Leave => {
                if let Some(room) = conn.room.take() {
                    room.send(RoomEvent::Leave { player: conn.player_id }).await;
                    info!("{} left room {}", conn.addr, room.code());
                }
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = chrono::Utc::now().timestamp_millis().max(0) as u64;
                let _ = conn.outbox.send(ServerMessage::Pong { timestamp, server_time }).await;
            }
            other => {
                let event = match room_event(conn.player_id, other) {
                    Ok(event) => event,
                    Err((code, message)) => {
                        conn.reply_error(code, message).await;
                        return;
                    }
                };
                let Some(room) = &conn.room else {
                    conn.reply_error(ErrorCode::NotInRoom, "Join a room first").await;
                    return;
                };
                if !room.send(event).await {
                    let code = room.code().to_owned();
                    conn.room = None;
                    conn.reply_error(ErrorCode::RoomNotFound, format!("Room {} closed", code)).await;
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Connections currently seated in a room.
    pub async fn connections_in_room(&self, code: &str) -> usize {
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|c| c.room_code.as_deref() == Some(code))
            .count()
    }

    /// Get live room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.room_count().await
    }

    /// Shared content (for refreshes).
    pub fn content(&self) -> &ContentStore {
        self.rooms.content()
    }
}

impl Connection {
    async fn join(&mut self, room: RoomHandle, nickname: String) {
        match room.join(self.player_id, nickname, self.outbox.clone()).await {
            Ok(()) => {
                info!("{} joined room {}", self.addr, room.code());
                self.room = Some(room);
            }
            Err(e) => self.reply_error(ErrorCode::from(&e), e.to_string()).await,
        }
    }

    async fn reply_error(&self, code: ErrorCode, message: impl Into<String>) {
        let _ = self.outbox.send(ServerMessage::error(code, message)).await;
    }
}

/// Translate a room-bound client request into a room event.
///
/// Room creation, joining, leaving and pings are handled by the connection
/// itself and never reach here.
fn room_event(player: PlayerId, msg: ClientMessage) -> Result<RoomEvent, (ErrorCode, String)> {
    let event = match msg {
        ClientMessage::ToggleReady { ready } => RoomEvent::ToggleReady { player, ready },
        ClientMessage::Start => RoomEvent::Start { player },
        ClientMessage::SetRounds(request) => match request.limit() {
            Some(rounds) => RoomEvent::SetRounds { player, rounds },
            None => {
                return Err((
                    ErrorCode::InvalidInput,
                    "Give a positive count or infinite".to_string(),
                ))
            }
        },
        ClientMessage::SetFilter { filter } => RoomEvent::SetFilter { player, filter },
        ClientMessage::AttemptPair {
            zone_a,
            zone_b,
            round_index,
        } => RoomEvent::Attempt {
            player,
            zone_a,
            zone_b,
            round_index,
        },
        ClientMessage::EndSession => RoomEvent::EndSession { player },
        ClientMessage::SyncRequest => RoomEvent::SyncRequest { player },
        ClientMessage::HistoryRequest => RoomEvent::HistoryRequest { player },
        ClientMessage::CreateRoom { .. }
        | ClientMessage::JoinRoom { .. }
        | ClientMessage::Leave
        | ClientMessage::Ping { .. } => {
            return Err((ErrorCode::InvalidState, "Not a room request".to_string()))
        }
    };
    Ok(event)
}
