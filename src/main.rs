//! Matchboard Server
//!
//! Runs the room server, or with `demo` plays one offline session against
//! the bundled demo catalog and checks that a client computes the same
//! boards as the server.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use matchboard::{
    catalog::Catalog,
    client::{ClientSync, SyncOutcome},
    engine::{ContentLibrary, ContentStore, TemplateRegistry},
    network::{GameServer, ServerConfig},
    session::{Effect, FixedEntropy, Room, RoomEvent, RoundLimit, SessionConfig, TimerKind, PlayerId},
    VERSION,
};

const DEMO_CATALOG: &str = include_str!("../demos/catalog.json");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Matchboard Server v{}", VERSION);

    if std::env::args().nth(1).as_deref() == Some("demo") {
        return demo_session();
    }

    let config = ServerConfig::from_env()?;
    let server = Arc::new(GameServer::from_config(config).await?);

    let serving = server.clone();
    let mut run = tokio::spawn(async move { serving.run().await });

    tokio::select! {
        result = &mut run => {
            result.context("server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
            run.await.context("server task panicked")??;
        }
    }

    Ok(())
}

/// Play a three-round session offline.
fn demo_session() -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");

    let catalog = Catalog::from_json(DEMO_CATALOG).context("demo catalog")?;
    info!("Catalog version: {}", catalog.version());
    let library = ContentLibrary::new(catalog, TemplateRegistry::builtin());
    let store = ContentStore::new(library);

    let config = SessionConfig {
        default_rounds: RoundLimit::Finite(3),
        ..Default::default()
    };
    let mut room = Room::new("DEMOS", config, store.clone(), Box::new(FixedEntropy([42; 32])));
    let mut client = ClientSync::new(store.current());

    let players: Vec<PlayerId> = (1..=2u8).map(|i| PlayerId::from_bytes([i; 16])).collect();
    let mut pending = Vec::new();
    for (i, id) in players.iter().enumerate() {
        pending.extend(room.handle(RoomEvent::Join { player: *id, nickname: format!("player{}", i + 1) }));
        pending.extend(room.handle(RoomEvent::ToggleReady { player: *id, ready: true }));
    }
    pending.extend(room.handle(RoomEvent::Start { player: players[0] }));

    // Timers fire immediately; round winners alternate.
    let mut ended = false;
    while !ended {
        let mut timers = Vec::new();
        for effect in pending.drain(..) {
            match effect {
                Effect::ScheduleTimer { timer, token, .. } => timers.push((timer, token)),
                Effect::Broadcast(msg) => {
                    if let SyncOutcome::NeedsResync(_) = client.apply(&msg) {
                        warn!("Client lost sync");
                    }
                }
                Effect::AppendHistory(_) => ended = true,
                _ => {}
            }
        }

        if let (Some(server), Some(local)) = (room.current_board(), client.board()) {
            let round = room.rounds_played();
            info!(
                "Round {}: template {} seed={:08x} hash={}",
                round,
                server.template_id,
                server.seed,
                hex::encode(&server.hash()[..8])
            );
            if server.hash() != local.hash() {
                anyhow::bail!("client board differs from server in round {}", round);
            }
            if round % 3 != 2 {
                if let Some((a, b)) = server.correct_pair() {
                    let winner = players[round as usize % players.len()];
                    pending.extend(room.handle(RoomEvent::Attempt {
                        player: winner,
                        zone_a: a,
                        zone_b: b,
                        round_index: Some(round),
                    }));
                    continue;
                }
            }
        }

        if timers.is_empty() && pending.is_empty() {
            break;
        }
        for (timer, token) in timers {
            if timer != TimerKind::Grace {
                pending.extend(room.handle(RoomEvent::timer_fired(timer, token)));
            }
        }
    }

    info!("=== Session Results ===");
    for record in room.history() {
        for score in &record.per_player_scores {
            info!("{}: {}", score.nickname, score.score);
        }
        match &record.winner {
            Some(winner) => info!("Winner: {}", winner.nickname),
            None => info!("No winner"),
        }
    }
    Ok(())
}
