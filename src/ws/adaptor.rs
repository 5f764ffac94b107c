use loro::LoroDoc;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::presence::PresenceStore;
use super::transport::Outbound;
use crate::models::{ChannelKind, ClientMessage, RoomId, SessionError, UpdateMessage};

/// Live state object behind an adaptor
#[derive(Clone)]
pub enum LiveState {
    Document(Arc<LoroDoc>),
    Presence(Arc<PresenceStore>),
}

/// Sends local mutations of one joined channel upstream
#[derive(Clone, Debug)]
pub struct Upstream {
    room: RoomId,
    kind: ChannelKind,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Upstream {
    pub fn new(room: RoomId, kind: ChannelKind, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { room, kind, tx }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Queue `delta` for the server. Returns false once the transport is gone,
    /// which also tells CRDT subscriptions to stop calling us.
    pub fn push(&self, delta: Vec<u8>) -> bool {
        self.tx
            .send(Outbound::Frame(ClientMessage::Update(UpdateMessage {
                room_id: self.room.clone(),
                channel: self.kind,
                delta,
            })))
            .is_ok()
    }
}

/// Wraps one CRDT state object so it can be bound to a joined channel.
pub trait ChannelAdaptor: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Payload of the join request
    fn join_payload(&self) -> Vec<u8>;

    /// Apply the server's join reply. Returns bytes the server is missing.
    fn on_joined(&self, updates: &[u8], version: &[u8]) -> Result<Option<Vec<u8>>, SessionError>;

    /// Apply an update received from the server
    fn apply_remote(&self, update: &[u8]) -> Result<(), SessionError>;

    /// Start forwarding local mutations upstream
    fn attach(&self, upstream: Upstream);

    /// Stop forwarding local mutations
    fn detach(&self);

    fn is_attached(&self) -> bool;

    /// Live state, usable before attach
    fn state(&self) -> LiveState;
}
