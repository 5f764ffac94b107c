use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::{ConnectedDocument, PublishedView};

/// Read side of a session's published view, handed to presentation code
#[derive(Clone)]
pub struct SessionContext {
    rx: watch::Receiver<PublishedView>,
}

impl SessionContext {
    pub(crate) fn new(rx: watch::Receiver<PublishedView>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> PublishedView {
        self.rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.rx.borrow().is_connected()
    }

    pub fn document(&self) -> Option<Arc<ConnectedDocument>> {
        self.rx.borrow().connected_document.clone()
    }

    /// Wait for the next change. Returns false once the session is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Wait until a connected view is published
    pub async fn wait_connected(&mut self, timeout: Duration) -> Option<Arc<ConnectedDocument>> {
        let view = tokio::time::timeout(timeout, self.rx.wait_for(|view| view.is_connected()))
            .await
            .ok()?
            .ok()?
            .connected_document
            .clone();
        view
    }
}
