use loro::awareness::EphemeralStore;
use loro::{ExportMode, LoroDoc, VersionVector};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::models::{ChannelKind, RoomId};

pub const BROADCAST_CAPACITY: usize = 256;
const RELAY_PRESENCE_TIMEOUT_MS: i64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub room: RoomId,
    pub kind: ChannelKind,
}

impl RoomKey {
    pub fn new(room: RoomId, kind: ChannelKind) -> Self {
        Self { room, kind }
    }
}

#[derive(Debug, Clone)]
pub struct RoomUpdate {
    pub sender_id: String,
    pub delta: Vec<u8>,
}

/// State a joining connection is missing
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    pub updates: Vec<u8>,
    pub version: Vec<u8>,
}

enum RoomState {
    Document(LoroDoc),
    Presence(EphemeralStore),
}

pub struct Room {
    key: RoomKey,
    state: Mutex<RoomState>,
    broadcast: broadcast::Sender<RoomUpdate>,
    subscribers: Mutex<HashSet<String>>,
}

impl Room {
    fn new(key: RoomKey) -> Self {
        let state = match key.kind {
            ChannelKind::Persistent => RoomState::Document(LoroDoc::new()),
            ChannelKind::Ephemeral => RoomState::Presence(EphemeralStore::new(RELAY_PRESENCE_TIMEOUT_MS)),
        };
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            key,
            state: Mutex::new(state),
            broadcast,
            subscribers: Mutex::new(HashSet::new()),
        }
    }

    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Merge `delta` into the room and forward it to the other subscribers
    pub fn apply(&self, sender_id: &str, delta: Vec<u8>) -> Result<(), String> {
        let state = self.state.lock();
        match &*state {
            RoomState::Document(doc) => {
                doc.import(&delta).map_err(|e| format!("Invalid document update: {}", e))?;
            }
            RoomState::Presence(store) => {
                store.apply(&delta).map_err(|e| format!("Invalid presence update: {}", e))?;
            }
        }
        // No receivers is fine
        let _ = self.broadcast.send(RoomUpdate {
            sender_id: sender_id.to_string(),
            delta,
        });
        Ok(())
    }

    /// Everything the room holds, encoded as one update. Importing it is idempotent,
    /// which makes it the resync payload for subscribers that fell behind.
    pub fn full_state(&self) -> Result<Vec<u8>, String> {
        match &*self.state.lock() {
            RoomState::Document(doc) => doc
                .export(ExportMode::all_updates())
                .map_err(|e| format!("Failed to export room state: {}", e)),
            RoomState::Presence(store) => Ok(store.encode_all()),
        }
    }

    /// Text of a persistent room's root text container, for diagnostics and tests
    pub fn text(&self, container: &str) -> Option<String> {
        match &*self.state.lock() {
            RoomState::Document(doc) => Some(doc.get_text(container).to_string()),
            RoomState::Presence(_) => None,
        }
    }

    fn snapshot_for(&self, state: &RoomState, client_version: &[u8]) -> Result<JoinSnapshot, String> {
        match state {
            RoomState::Document(doc) => {
                let client_vv = if client_version.is_empty() {
                    VersionVector::new()
                } else {
                    VersionVector::decode(client_version).map_err(|e| format!("Invalid client version: {}", e))?
                };
                let updates = doc
                    .export(ExportMode::updates(&client_vv))
                    .map_err(|e| format!("Failed to export room state: {}", e))?;
                Ok(JoinSnapshot {
                    updates,
                    version: doc.oplog_vv().encode(),
                })
            }
            RoomState::Presence(store) => Ok(JoinSnapshot {
                updates: store.encode_all(),
                version: Vec::new(),
            }),
        }
    }
}

/// All rooms the relay currently holds, one per (room id, channel kind)
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomKey, Arc<Room>>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: u32,
    pub persistent_rooms: u32,
    pub ephemeral_rooms: u32,
    pub subscriptions: u32,
    /// Distinct connections holding at least one subscription
    pub connections: u32,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RoomKey) -> Option<Arc<Room>> {
        self.rooms.lock().get(key).cloned()
    }

    /// Subscribe `conn_id` to the room, creating it if needed. The snapshot and the
    /// subscription are taken under the room state lock so no update falls between them.
    pub fn join(
        &self,
        key: &RoomKey,
        conn_id: &str,
        client_version: &[u8],
    ) -> Result<(JoinSnapshot, broadcast::Receiver<RoomUpdate>), String> {
        // Subscribe while holding the registry lock so cleanup cannot reclaim the room in between
        let room = {
            let mut rooms = self.rooms.lock();
            let room = rooms
                .entry(key.clone())
                .or_insert_with(|| {
                    info!("Opening {} room {}", key.kind, key.room);
                    Arc::new(Room::new(key.clone()))
                })
                .clone();
            if !room.subscribers.lock().insert(conn_id.to_string()) {
                return Err("channel already joined on this connection".to_string());
            }
            room
        };

        let state = room.state.lock();
        match room.snapshot_for(&state, client_version) {
            Ok(snapshot) => Ok((snapshot, room.broadcast.subscribe())),
            Err(e) => {
                room.subscribers.lock().remove(conn_id);
                Err(e)
            }
        }
    }

    /// Returns whether `conn_id` was subscribed
    pub fn leave(&self, key: &RoomKey, conn_id: &str) -> bool {
        match self.get(key) {
            Some(room) => room.subscribers.lock().remove(conn_id),
            None => false,
        }
    }

    /// Reclaim the room if nobody is subscribed anymore. Returns whether it was removed.
    pub fn cleanup(&self, key: &RoomKey) -> bool {
        let mut rooms = self.rooms.lock();
        let idle = rooms.get(key).map(|room| room.subscriber_count() == 0);
        match idle {
            Some(true) => {
                rooms.remove(key);
                info!("Closed {} room {}", key.kind, key.room);
                true
            }
            Some(false) => {
                debug!("Room {} ({}) still has subscribers, keeping it", key.room, key.kind);
                false
            }
            None => false,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let rooms = self.rooms.lock();
        let mut stats = RegistryStats::default();
        let mut connections = HashSet::new();
        for (key, room) in rooms.iter() {
            stats.rooms += 1;
            match key.kind {
                ChannelKind::Persistent => stats.persistent_rooms += 1,
                ChannelKind::Ephemeral => stats.ephemeral_rooms += 1,
            }
            let subscribers = room.subscribers.lock();
            stats.subscriptions += subscribers.len() as u32;
            connections.extend(subscribers.iter().cloned());
        }
        stats.connections = connections.len() as u32;
        stats
    }
}
