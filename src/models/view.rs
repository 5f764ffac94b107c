use loro::LoroDoc;
use std::fmt;
use std::sync::Arc;

use super::DocumentMetadata;
use crate::ws::presence::PresenceStore;

/// Document metadata merged with the live state of both channels
pub struct ConnectedDocument {
    pub metadata: DocumentMetadata,
    pub doc: Arc<LoroDoc>,
    pub presence: Arc<PresenceStore>,
}

impl ConnectedDocument {
    pub fn new(metadata: DocumentMetadata, doc: Arc<LoroDoc>, presence: Arc<PresenceStore>) -> Self {
        Self {
            metadata,
            doc,
            presence,
        }
    }
}

impl fmt::Debug for ConnectedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedDocument")
            .field("metadata", &self.metadata)
            .field("presence_key", &self.presence.local_key())
            .finish_non_exhaustive()
    }
}

/// What presentation code sees. Both fields are `None` before the session
/// connects and again once teardown starts.
#[derive(Debug, Clone, Default)]
pub struct PublishedView {
    pub document_id: Option<String>,
    pub connected_document: Option<Arc<ConnectedDocument>>,
}

impl PublishedView {
    pub fn connected(document: ConnectedDocument) -> Self {
        Self {
            document_id: Some(document.metadata.id.clone()),
            connected_document: Some(Arc::new(document)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected_document.is_some()
    }
}
