use chrono::{DateTime, Utc};
use loro::awareness::EphemeralStore;
use loro::{Subscription, ToJson};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::adaptor::{ChannelAdaptor, LiveState, Upstream};
use crate::models::{ChannelKind, SessionError, UserIdentity};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceCursor {
    pub block_id: String,
    pub offset: u32,
}

/// What a participant broadcasts about itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub user: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cursor: Option<PresenceCursor>,
    pub updated_at: DateTime<Utc>,
}

impl PresenceState {
    pub fn for_user(user: &UserIdentity) -> Self {
        Self {
            user: user.id.clone(),
            name: user.name.clone(),
            cursor: None,
            updated_at: Utc::now(),
        }
    }
}

/// Presence entries of a room, one per participant, keyed by a per-session peer key.
/// Entries expire after the store timeout unless refreshed.
pub struct PresenceStore {
    store: EphemeralStore,
    local_key: String,
}

impl PresenceStore {
    pub fn new(local_key: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            store: EphemeralStore::new(timeout_ms as i64),
            local_key: local_key.into(),
        }
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    pub fn set_local(&self, state: &PresenceState) -> Result<(), SessionError> {
        let encoded = serde_json::to_string(state)
            .map_err(|e| SessionError::Protocol(format!("Failed to encode presence: {}", e)))?;
        self.store.set(&self.local_key, encoded);
        Ok(())
    }

    /// Move this participant's cursor, keeping the rest of its entry
    pub fn set_cursor(&self, cursor: Option<PresenceCursor>) -> Result<(), SessionError> {
        match self.local() {
            Some(mut state) => {
                state.cursor = cursor;
                state.updated_at = Utc::now();
                self.set_local(&state)
            }
            None => Err(SessionError::Protocol("No local presence to update".to_string())),
        }
    }

    pub fn clear_local(&self) {
        self.store.delete(&self.local_key);
    }

    pub fn local(&self) -> Option<PresenceState> {
        self.all().remove(&self.local_key)
    }

    /// Every other participant currently present
    pub fn peers(&self) -> HashMap<String, PresenceState> {
        let mut states = self.all();
        states.remove(&self.local_key);
        states
    }

    pub fn all(&self) -> HashMap<String, PresenceState> {
        let mut states = HashMap::new();
        for (key, value) in self.store.get_all_states() {
            match value.to_json_value() {
                serde_json::Value::String(raw) => match serde_json::from_str(&raw) {
                    Ok(state) => {
                        states.insert(key, state);
                    }
                    Err(e) => warn!("Skipping malformed presence entry '{}': {}", key, e),
                },
                other => debug!("Skipping non-presence entry '{}': {}", key, other),
            }
        }
        states
    }

    /// Drop every entry, local and remote
    pub fn clear(&self) {
        let keys: Vec<String> = self.store.get_all_states().into_iter().map(|(key, _)| key).collect();
        for key in keys {
            self.store.delete(&key);
        }
    }

    pub(crate) fn encode_local(&self) -> Vec<u8> {
        self.store.encode(&self.local_key)
    }

    pub(crate) fn apply(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.store
            .apply(bytes)
            .map_err(|e| SessionError::Crdt(format!("Failed to apply presence update: {}", e)))
    }

    fn subscribe_local(&self, upstream: Upstream) -> Subscription {
        self.store
            .subscribe_local_updates(Box::new(move |bytes: &Vec<u8>| upstream.push(bytes.clone())))
    }
}

/// Binds a `PresenceStore` to the ephemeral channel of a room.
///
/// Nothing here is durable: leaving retracts this participant's entry and
/// drops whatever was learned about the others, so a rejoin starts empty.
pub struct EphemeralPresenceAdaptor {
    store: Arc<PresenceStore>,
    user: UserIdentity,
    subscription: Mutex<Option<Subscription>>,
}

impl EphemeralPresenceAdaptor {
    pub fn new(user: UserIdentity, peer_key: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            store: Arc::new(PresenceStore::new(peer_key, timeout_ms)),
            user,
            subscription: Mutex::new(None),
        }
    }

    pub fn store(&self) -> Arc<PresenceStore> {
        self.store.clone()
    }
}

impl ChannelAdaptor for EphemeralPresenceAdaptor {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Ephemeral
    }

    fn join_payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn on_joined(&self, updates: &[u8], _version: &[u8]) -> Result<Option<Vec<u8>>, SessionError> {
        if !updates.is_empty() {
            self.store.apply(updates)?;
        }
        // Announce ourselves; the subscription is not attached yet so this goes out as catch-up
        self.store.set_local(&PresenceState::for_user(&self.user))?;
        Ok(Some(self.store.encode_local()))
    }

    fn apply_remote(&self, update: &[u8]) -> Result<(), SessionError> {
        self.store.apply(update)
    }

    fn attach(&self, upstream: Upstream) {
        let subscription = self.store.subscribe_local(upstream);
        *self.subscription.lock() = Some(subscription);
    }

    fn detach(&self) {
        let subscription = self.subscription.lock().take();
        if subscription.is_some() {
            // Still subscribed, so peers are told we are gone
            self.store.clear_local();
        }
        drop(subscription);
        self.store.clear();
    }

    fn is_attached(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn state(&self) -> LiveState {
        LiveState::Presence(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientMessage, RoomId};
    use crate::ws::transport::Outbound;
    use tokio::sync::mpsc;

    fn adaptor(user: &str) -> EphemeralPresenceAdaptor {
        EphemeralPresenceAdaptor::new(UserIdentity::new(user).with_name(user.to_uppercase()), format!("peer-{}", user), 30_000)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(Outbound::Frame(ClientMessage::Update(update))) = rx.try_recv() {
            out.push(update.delta);
        }
        out
    }

    #[test]
    fn presence_starts_empty() {
        let adaptor = adaptor("ann");
        match adaptor.state() {
            LiveState::Presence(store) => assert!(store.all().is_empty()),
            LiveState::Document(_) => panic!("expected presence state"),
        }
    }

    #[test]
    fn join_announces_local_presence_to_peers() {
        let ann = adaptor("ann");
        let bob = adaptor("bob");

        let announce = ann.on_joined(&[], &[]).unwrap().unwrap();
        bob.apply_remote(&announce).unwrap();

        let peers = bob.store().peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["peer-ann"].user, "ann");
        assert_eq!(peers["peer-ann"].name.as_deref(), Some("ANN"));
        assert_eq!(ann.store().local().map(|s| s.user), Some("ann".to_string()));
    }

    #[test]
    fn cursor_moves_are_pushed_while_attached() {
        let ann = adaptor("ann");
        let (tx, mut rx) = mpsc::unbounded_channel();
        ann.on_joined(&[], &[]).unwrap();
        ann.attach(Upstream::new(RoomId::new("acme", "d1"), ChannelKind::Ephemeral, tx));

        ann.store()
            .set_cursor(Some(PresenceCursor { block_id: "b1".to_string(), offset: 4 }))
            .unwrap();
        let pushed = drain(&mut rx);
        assert_eq!(pushed.len(), 1);

        let bob = adaptor("bob");
        bob.apply_remote(&pushed[0]).unwrap();
        let cursor = bob.store().peers()["peer-ann"].cursor.clone();
        assert_eq!(cursor, Some(PresenceCursor { block_id: "b1".to_string(), offset: 4 }));
    }

    #[test]
    fn detach_retracts_and_forgets() {
        let ann = adaptor("ann");
        let bob = adaptor("bob");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let bob_hello = bob.on_joined(&[], &[]).unwrap().unwrap();
        let ann_hello = ann.on_joined(&[], &[]).unwrap().unwrap();
        ann.apply_remote(&bob_hello).unwrap();
        bob.apply_remote(&ann_hello).unwrap();
        ann.attach(Upstream::new(RoomId::new("acme", "d1"), ChannelKind::Ephemeral, tx));
        assert_eq!(bob.store().peers().len(), 1);

        ann.detach();
        assert!(!ann.is_attached());
        assert!(ann.store().all().is_empty());

        let retraction = drain(&mut rx);
        assert_eq!(retraction.len(), 1);
        bob.apply_remote(&retraction[0]).unwrap();
        assert!(bob.store().peers().is_empty());
    }
}
