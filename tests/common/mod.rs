#![allow(dead_code)]

use async_trait::async_trait;
use colabri_session::ws::{ChannelAdaptor, ChannelHandle, Connector, Outbound, Transport, Upstream};
use colabri_session::{ChannelKind, DocumentKind, DocumentMetadata, RoomId, SessionConfig, SessionError, UserIdentity};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const ENDPOINT: &str = "ws://collab.test/ws";

/// Everything the fake transports did, shared by all connections one connector opened
#[derive(Default)]
pub struct FakeNetwork {
    events: Mutex<Vec<String>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    opened: AtomicUsize,
    fail_ready: AtomicBool,
    fail_join: Mutex<Option<ChannelKind>>,
    silent_join: Mutex<Option<ChannelKind>>,
    fail_leave: Mutex<Option<ChannelKind>>,
    ready_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == event).count()
    }

    /// Connections opened and not closed yet
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most connections that were open at the same time
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn fail_ready(&self) {
        self.fail_ready.store(true, Ordering::SeqCst);
    }

    pub fn fail_join(&self, kind: ChannelKind) {
        *self.fail_join.lock() = Some(kind);
    }

    /// Never answer joins of `kind`; they fail once the join timeout passes
    pub fn silent_join(&self, kind: ChannelKind) {
        *self.silent_join.lock() = Some(kind);
    }

    pub fn fail_leave(&self, kind: ChannelKind) {
        *self.fail_leave.lock() = Some(kind);
    }

    /// Hold every `wait_ready` until the returned gate is notified or the ready timeout passes
    pub fn hold_ready(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.ready_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector { net: self.clone() })
    }
}

struct FakeConnector {
    net: Arc<FakeNetwork>,
}

impl Connector for FakeConnector {
    fn open(&self, endpoint: &str) -> Arc<dyn Transport> {
        self.net.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.net.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.net.max_live.fetch_max(live, Ordering::SeqCst);
        self.net.record("open");
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(FakeTransport {
            net: self.net.clone(),
            endpoint: endpoint.to_string(),
            closed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            tx,
            _rx: Mutex::new(rx),
        })
    }
}

struct FakeTransport {
    net: Arc<FakeNetwork>,
    endpoint: String,
    closed: AtomicBool,
    aborted: AtomicBool,
    tx: mpsc::UnboundedSender<Outbound>,
    // Keeps the upstream queue open so adaptors stay subscribed
    _rx: Mutex<mpsc::UnboundedReceiver<Outbound>>,
}

#[async_trait]
impl Transport for FakeTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), SessionError> {
        let gate = self.net.ready_gate.lock().clone();
        if let Some(gate) = gate {
            if tokio::time::timeout(timeout, gate.notified()).await.is_err() {
                self.net.record("ready-timeout");
                return Err(SessionError::connection(
                    &self.endpoint,
                    format!("not ready after {}ms", timeout.as_millis()),
                ));
            }
        }
        if self.aborted.load(Ordering::SeqCst) {
            return Err(SessionError::connection(&self.endpoint, "link task ended"));
        }
        if self.net.fail_ready.load(Ordering::SeqCst) {
            self.net.record("ready-failed");
            return Err(SessionError::connection(&self.endpoint, "connection refused"));
        }
        self.net.record("ready");
        Ok(())
    }

    async fn join(
        &self,
        room: &RoomId,
        adaptor: Arc<dyn ChannelAdaptor>,
        timeout: Duration,
    ) -> Result<Box<dyn ChannelHandle>, SessionError> {
        let kind = adaptor.kind();
        self.net.record(format!("join-{}", kind));
        if self.aborted.load(Ordering::SeqCst) {
            return Err(SessionError::join(room.as_str(), kind, "connection closed"));
        }
        if *self.net.silent_join.lock() == Some(kind) {
            tokio::time::sleep(timeout).await;
            return Err(SessionError::join(
                room.as_str(),
                kind,
                format!("no reply after {}ms", timeout.as_millis()),
            ));
        }
        if *self.net.fail_join.lock() == Some(kind) {
            return Err(SessionError::join(room.as_str(), kind, "rejected by server"));
        }
        adaptor.on_joined(&[], &[])?;
        adaptor.attach(Upstream::new(room.clone(), kind, self.tx.clone()));
        Ok(Box::new(FakeHandle {
            net: self.net.clone(),
            kind,
            adaptor,
        }))
    }

    async fn cleanup_room(&self, _room: &RoomId, kind: ChannelKind) -> Result<(), SessionError> {
        self.net.record(format!("cleanup-{}", kind));
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        self.net.record("destroy-connection");
        if !self.closed.swap(true, Ordering::SeqCst) {
            // The socket stays open until the close handshake is done
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.net.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn abort(&self) {
        self.net.record("abort-connection");
        self.aborted.store(true, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.net.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct FakeHandle {
    net: Arc<FakeNetwork>,
    kind: ChannelKind,
    adaptor: Arc<dyn ChannelAdaptor>,
}

#[async_trait]
impl ChannelHandle for FakeHandle {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn leave(&self) -> Result<(), SessionError> {
        self.net.record(format!("leave-{}", self.kind));
        if *self.net.fail_leave.lock() == Some(self.kind) {
            return Err(SessionError::TransportClosed);
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        self.net.record(format!("destroy-{}", self.kind));
        self.adaptor.detach();
        Ok(())
    }
}

pub fn metadata(kind: DocumentKind) -> DocumentMetadata {
    DocumentMetadata {
        id: "d1".to_string(),
        org: "acme".to_string(),
        name: "Quarterly statement".to_string(),
        kind,
        owner: Some("u-owner".to_string()),
        created_at: None,
        updated_at: None,
    }
}

pub fn user() -> UserIdentity {
    UserIdentity::new("u1").with_name("Ann")
}

pub fn room() -> RoomId {
    RoomId::new("acme", "d1")
}

pub fn session_config() -> SessionConfig {
    let mut config = SessionConfig::new(ENDPOINT);
    config.connect_timeout = Duration::from_secs(2);
    config.join_timeout = Duration::from_secs(2);
    config
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
