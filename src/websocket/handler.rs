use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    ChannelMessage, ClientMessage, JoinErrorMessage, JoinMessage, JoinedMessage, PongMessage,
    ServerMessage, UpdateMessage,
};
use crate::services::room_service::{Room, RoomKey, RoomRegistry, RoomUpdate};

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<RoomRegistry>>,
) -> Response {
    debug!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Per-connection state: which channels it joined and the tasks forwarding them
struct Connection {
    id: String,
    registry: Arc<RoomRegistry>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    forwards: HashMap<RoomKey, JoinHandle<()>>,
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let conn_id = Uuid::new_v4().to_string();
    info!("WebSocket connection established with connection_id: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Single writer so frames of one connection never interleave out of order
    let writer_id = conn_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode frame for {}: {}", writer_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut conn = Connection {
        id: conn_id,
        registry,
        outbound: outbound_tx,
        forwards: HashMap::new(),
    };

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => conn.handle(msg),
                Err(e) => warn!("Failed to parse message from {}: {}", conn.id, e),
            },
            Message::Close(_) => break,
            _ => continue,
        }
    }

    conn.close();
    // Let queued replies drain before the writer goes away
    drop(conn);
    let _ = writer.await;
}

impl Connection {
    fn handle(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Join(join) => self.join(join),
            ClientMessage::Update(update) => self.update(update),
            ClientMessage::Leave(leave) => self.leave(leave),
            ClientMessage::Cleanup(cleanup) => self.cleanup(cleanup),
            ClientMessage::Ping(ping) => {
                debug!("Ping from peer {}", ping.peer);
                let _ = self.outbound.send(ServerMessage::Pong(PongMessage {
                    date: Utc::now().to_rfc3339(),
                }));
            }
        }
    }

    fn join(&mut self, join: JoinMessage) {
        let key = RoomKey::new(join.room_id.clone(), join.channel);
        let (snapshot, updates) = match self.registry.join(&key, &self.id, &join.version) {
            Ok(joined) => joined,
            Err(message) => {
                warn!("Join of {} ({}) by {} rejected: {}", key.room, key.kind, self.id, message);
                let _ = self.outbound.send(ServerMessage::JoinError(JoinErrorMessage {
                    room_id: join.room_id,
                    channel: join.channel,
                    message,
                }));
                return;
            }
        };

        // The reply is queued before the forwarder starts, so it always arrives first
        let _ = self.outbound.send(ServerMessage::Joined(JoinedMessage {
            room_id: join.room_id.clone(),
            channel: join.channel,
            updates: snapshot.updates,
            version: snapshot.version,
        }));

        let Some(room) = self.registry.get(&key) else {
            warn!("Room {} ({}) vanished right after join", key.room, key.kind);
            self.registry.leave(&key, &self.id);
            return;
        };
        let forward = tokio::spawn(forward_updates(
            updates,
            room,
            self.id.clone(),
            self.outbound.clone(),
        ));
        self.forwards.insert(key, forward);
        info!("{} joined {} ({})", self.id, join.room_id, join.channel);
    }

    fn update(&mut self, update: UpdateMessage) {
        let key = RoomKey::new(update.room_id, update.channel);
        if !self.forwards.contains_key(&key) {
            warn!("Rejecting update from {} for unjoined {} ({})", self.id, key.room, key.kind);
            return;
        }
        match self.registry.get(&key) {
            Some(room) => {
                if let Err(e) = room.apply(&self.id, update.delta) {
                    warn!("Dropping update from {}: {}", self.id, e);
                }
            }
            None => warn!("Room {} ({}) vanished while joined", key.room, key.kind),
        }
    }

    fn leave(&mut self, leave: ChannelMessage) {
        let key = RoomKey::new(leave.room_id, leave.channel);
        if let Some(forward) = self.forwards.remove(&key) {
            forward.abort();
        }
        if self.registry.leave(&key, &self.id) {
            info!("{} left {} ({})", self.id, key.room, key.kind);
        }
    }

    fn cleanup(&mut self, cleanup: ChannelMessage) {
        let key = RoomKey::new(cleanup.room_id, cleanup.channel);
        let closed = self.registry.cleanup(&key);
        debug!("Cleanup of {} ({}) by {}: closed={}", key.room, key.kind, self.id, closed);
    }

    /// Leave everything this connection still holds and reclaim rooms left empty
    fn close(&mut self) {
        for (key, forward) in self.forwards.drain() {
            forward.abort();
            self.registry.leave(&key, &self.id);
            self.registry.cleanup(&key);
        }
        info!("WebSocket connection {} terminated", self.id);
    }
}

async fn forward_updates(
    mut updates: broadcast::Receiver<RoomUpdate>,
    room: Arc<Room>,
    conn_id: String,
    outbound: mpsc::UnboundedSender<ServerMessage>,
) {
    let key = room.key().clone();
    loop {
        let delta = match updates.recv().await {
            Ok(update) => {
                // Skip messages from this connection to prevent echo
                if update.sender_id == conn_id {
                    continue;
                }
                update.delta
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Skipped deltas are gone, send the whole room instead
                warn!(
                    "{} lagged behind {} ({}), {} updates skipped, resyncing",
                    conn_id, key.room, key.kind, skipped
                );
                match room.full_state() {
                    Ok(state) => state,
                    Err(e) => {
                        error!("Cannot resync {} on {} ({}): {}", conn_id, key.room, key.kind, e);
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let frame = ServerMessage::Update(UpdateMessage {
            room_id: key.room.clone(),
            channel: key.kind,
            delta,
        });
        if outbound.send(frame).is_err() {
            break;
        }
    }
}
