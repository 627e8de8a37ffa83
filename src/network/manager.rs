//! Room Registry
//!
//! Maps room codes to running room actors and creates rooms on demand.

use std::collections::BTreeMap;
use std::sync::Arc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::info;

use crate::engine::library::ContentStore;
use crate::network::actor::{RoomActor, RoomHandle};
use crate::session::{HistoryStore, OsSeedSource, Room, SessionConfig};

/// Room code length.
pub const ROOM_CODE_LEN: usize = 5;

/// Code alphabet; no I or O so codes read unambiguously.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Random room code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-typed code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Registry of live rooms.
pub struct RoomManager {
    rooms: RwLock<BTreeMap<String, RoomHandle>>,
    content: ContentStore,
    history: Arc<HistoryStore>,
    session: SessionConfig,
}

impl RoomManager {
    /// Create an empty registry.
    pub fn new(content: ContentStore, history: Arc<HistoryStore>, session: SessionConfig) -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            content,
            history,
            session,
        }
    }

    /// Open a room under a fresh code and start its actor.
    ///
    /// Codes that are live or already have recorded sessions are skipped,
    /// so a new room never shows an earlier group's history.
    /// The room unregisters itself when its actor stops.
    pub async fn create(self: &Arc<Self>) -> RoomHandle {
        let mut rooms = self.rooms.write().await;
        let mut rng = StdRng::from_entropy();
        let code = self.unused_code(&rooms, &mut rng).await;

        let room = Room::new(
            code.clone(),
            self.session.clone(),
            self.content.clone(),
            Box::new(OsSeedSource),
        );

        let (handle, actor) = RoomActor::new(room, self.history.clone());
        rooms.insert(code.clone(), handle.clone());
        info!("Room {} created ({} live)", code, rooms.len());

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            actor.run().await;
            manager.remove(&code).await;
        });

        handle
    }

    async fn unused_code<R: Rng + ?Sized>(
        &self,
        rooms: &BTreeMap<String, RoomHandle>,
        rng: &mut R,
    ) -> String {
        loop {
            let candidate = generate_code(rng);
            if !rooms.contains_key(&candidate) && !self.history.has_room(&candidate).await {
                return candidate;
            }
        }
    }

    /// Look up a room by code (case-insensitive).
    pub async fn get(&self, code: &str) -> Option<RoomHandle> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&normalize_code(code))
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Unregister a room.
    pub async fn remove(&self, code: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.remove(code).is_some();
        if removed {
            info!("Room {} removed ({} live)", code, rooms.len());
        }
        removed
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Shared content.
    pub fn content(&self) -> &ContentStore {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use chrono::Utc;
    use uuid::Uuid;
    use tokio::sync::mpsc;
    use crate::catalog::tests::sample_catalog;
    use crate::engine::library::ContentLibrary;
    use crate::engine::template::TemplateRegistry;
    use crate::session::{PlayerId, RoomEvent, SessionRecord};

    fn manager_with_history(grace: Duration, history: Arc<HistoryStore>) -> Arc<RoomManager> {
        let store = ContentStore::new(ContentLibrary::new(sample_catalog(), TemplateRegistry::builtin()));
        let session = SessionConfig {
            empty_room_grace: grace,
            ..Default::default()
        };
        Arc::new(RoomManager::new(store, history, session))
    }

    fn manager(grace: Duration) -> Arc<RoomManager> {
        manager_with_history(grace, Arc::new(HistoryStore::in_memory()))
    }

    #[test]
    fn test_code_shape() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
        assert_eq!(normalize_code(" abcde "), "ABCDE");
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let manager = manager(Duration::from_secs(30));
        let a = manager.create().await;
        let b = manager.create().await;

        assert_ne!(a.code(), b.code());
        assert_eq!(manager.room_count().await, 2);
        let found = manager.get(&a.code().to_lowercase()).await.unwrap();
        assert_eq!(found.code(), a.code());
        assert!(manager.get("ZZZZZZ").await.is_none());
    }

    #[tokio::test]
    async fn test_torn_down_room_is_unregistered() {
        let manager = manager(Duration::from_millis(20));
        let room = manager.create().await;
        let player = PlayerId::new_v4();

        room.join(player, "ana".into(), mpsc::channel(8).0).await.unwrap();
        room.send(RoomEvent::Leave { player }).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.room_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(manager.get(room.code()).await.is_none());
    }

    #[tokio::test]
    async fn test_code_with_past_sessions_is_not_reused() {
        let reused = generate_code(&mut StdRng::seed_from_u64(7));

        let history = Arc::new(HistoryStore::in_memory());
        history
            .append(SessionRecord {
                room_code: reused.clone(),
                session_id: Uuid::new_v4(),
                ended_at: Utc::now(),
                winner: None,
                per_player_scores: vec![],
                rounds_played: 1,
            })
            .await
            .unwrap();
        let manager = manager_with_history(Duration::from_secs(30), history);

        let rooms = BTreeMap::new();
        let code = manager.unused_code(&rooms, &mut StdRng::seed_from_u64(7)).await;
        assert_ne!(code, reused);
        assert!(manager.history.records_for_room(&code).await.is_empty());
    }
}
