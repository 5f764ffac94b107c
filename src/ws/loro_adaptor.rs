use loro::{ExportMode, LoroDoc, Subscription, VersionVector};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::adaptor::{ChannelAdaptor, LiveState, Upstream};
use crate::models::{ChannelKind, SessionError};

/// Binds a `LoroDoc` to the persistent channel of a room.
///
/// The document survives reconnects: on join it announces its version vector,
/// imports what the server has that it lacks and hands back the updates the
/// server lacks, so both sides converge through the regular CRDT merge.
pub struct PersistentDocAdaptor {
    doc: Arc<LoroDoc>,
    subscription: Mutex<Option<Subscription>>,
}

impl PersistentDocAdaptor {
    pub fn new() -> Self {
        Self::with_doc(Arc::new(LoroDoc::new()))
    }

    pub fn with_doc(doc: Arc<LoroDoc>) -> Self {
        Self {
            doc,
            subscription: Mutex::new(None),
        }
    }

    pub fn doc(&self) -> Arc<LoroDoc> {
        self.doc.clone()
    }
}

impl Default for PersistentDocAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelAdaptor for PersistentDocAdaptor {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Persistent
    }

    fn join_payload(&self) -> Vec<u8> {
        self.doc.oplog_vv().encode()
    }

    fn on_joined(&self, updates: &[u8], version: &[u8]) -> Result<Option<Vec<u8>>, SessionError> {
        if !updates.is_empty() {
            self.doc
                .import(updates)
                .map_err(|e| SessionError::Crdt(format!("Failed to import join updates: {}", e)))?;
        }

        let server_vv = if version.is_empty() {
            VersionVector::new()
        } else {
            VersionVector::decode(version)
                .map_err(|e| SessionError::Crdt(format!("Invalid server version: {}", e)))?
        };

        let missing = self
            .doc
            .export(ExportMode::updates(&server_vv))
            .map_err(|e| SessionError::Crdt(format!("Failed to export catch-up updates: {}", e)))?;
        debug!("Persistent join caught up, {} bytes to push", missing.len());
        Ok(Some(missing))
    }

    fn apply_remote(&self, update: &[u8]) -> Result<(), SessionError> {
        self.doc
            .import(update)
            .map(|_| ())
            .map_err(|e| SessionError::Crdt(format!("Failed to import update: {}", e)))
    }

    fn attach(&self, upstream: Upstream) {
        let subscription = self
            .doc
            .subscribe_local_update(Box::new(move |bytes: &Vec<u8>| upstream.push(bytes.clone())));
        *self.subscription.lock() = Some(subscription);
    }

    fn detach(&self) {
        // Dropping the subscription unsubscribes
        self.subscription.lock().take();
    }

    fn is_attached(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn state(&self) -> LiveState {
        LiveState::Document(self.doc.clone())
    }
}
