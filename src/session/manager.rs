use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::SessionContext;
use super::eligibility::{self, Ineligible};
use super::teardown::Teardown;
use super::SessionConfig;
use crate::models::{
    ConnectedDocument, DocumentMetadata, PublishedView, RoomId, SessionError, UserIdentity,
};
use crate::ws::{Connector, EphemeralPresenceAdaptor, PersistentDocAdaptor, Transport};

/// Lifecycle of one session. `Connecting` is entered synchronously inside
/// `evaluate`, which is what keeps a second evaluation from starting a second connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Failed(SessionError),
    TornDown,
}

/// Outcome of `SessionManager::evaluate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Ineligible(Ineligible),
    AlreadyStarted,
    Started,
}

struct Inner {
    state: SessionState,
    teardown_requested: bool,
    /// Connection of the current connect, from open until teardown takes over
    transport: Option<Arc<dyn Transport>>,
    teardown: Option<Teardown>,
    settled: Option<watch::Receiver<bool>>,
}

struct Shared {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    view: watch::Sender<PublishedView>,
}

/// What `connect` hands back on success
struct Established {
    document: ConnectedDocument,
    teardown: Teardown,
}

enum TeardownStep {
    Nothing,
    AwaitConnect(watch::Receiver<bool>),
    Run(Teardown),
}

/// Flags the connect task as settled however it ends, panics included.
struct SettleGuard(watch::Sender<bool>);

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Owns the collaboration session of one mounted document view.
///
/// Opens at most one transport, joins the persistent and the ephemeral channel
/// on it, publishes the merged view and guarantees the ordered teardown runs at
/// most once. Dropping the manager counts as an unmount.
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (view, _) = watch::channel(PublishedView::default());
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    teardown_requested: false,
                    transport: None,
                    teardown: None,
                    settled: None,
                }),
                view,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state.clone()
    }

    pub fn view(&self) -> PublishedView {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> SessionContext {
        SessionContext::new(self.shared.view.subscribe())
    }

    /// Start connecting if the document is eligible and nothing was started yet.
    /// Safe to call on every metadata refresh. Must be called within a tokio runtime.
    pub fn evaluate(
        &self,
        metadata: Option<&DocumentMetadata>,
        user: Option<&UserIdentity>,
        room: &RoomId,
    ) -> Evaluation {
        let (metadata, user) =
            match eligibility::check(metadata, user, &self.shared.config.collaborative_kinds) {
                Ok(found) => found,
                Err(reason) => {
                    debug!("Room {} not eligible for a session: {:?}", room, reason);
                    return Evaluation::Ineligible(reason);
                }
            };

        let (settled_tx, settled_rx) = watch::channel(false);
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Idle {
                return Evaluation::AlreadyStarted;
            }
            inner.state = SessionState::Connecting;
            inner.settled = Some(settled_rx);
        }

        info!("Connecting session for room {}", room);
        let shared = self.shared.clone();
        let (room, metadata, user) = (room.clone(), metadata.clone(), user.clone());
        tokio::spawn(async move {
            let settle = SettleGuard(settled_tx);
            shared.finish_connect(room, metadata, user).await;
            drop(settle);
        });
        Evaluation::Started
    }

    /// Wait until the connect started by `evaluate` has finished and return the state
    /// it left behind. Returns the current state right away when nothing was started.
    pub async fn wait_settled(&self) -> SessionState {
        let settled = self.shared.inner.lock().settled.clone();
        if let Some(mut settled) = settled {
            let _ = settled.wait_for(|done| *done).await;
        }
        self.state()
    }

    /// Leave and release everything. Idempotent; when a connect is in flight this
    /// waits for it to settle and tears down whatever it established.
    pub async fn teardown(&self) {
        self.shared.teardown().await;
    }
}

impl Drop for SessionManager {
    /// Unmount. The connection is aborted before this returns so a remount never
    /// overlaps it; the ordered teardown still runs in the background.
    fn drop(&mut self) {
        let transport = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.state, SessionState::Connecting | SessionState::Connected) {
                return;
            }
            inner.teardown_requested = true;
            inner.transport.take()
        };
        if let Some(transport) = transport {
            transport.abort();
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.shared.clone();
                handle.spawn(async move { shared.teardown().await });
            }
            Err(_) => warn!("Session dropped outside a runtime, teardown skipped"),
        }
    }
}

impl Shared {
    async fn finish_connect(&self, room: RoomId, metadata: DocumentMetadata, user: UserIdentity) {
        let outcome = self.connect(&room, metadata, user).await;

        let abandoned = {
            let mut inner = self.inner.lock();
            match outcome {
                Ok(established) if inner.teardown_requested => {
                    inner.state = SessionState::TornDown;
                    inner.transport = None;
                    Some(established.teardown)
                }
                Ok(established) => {
                    inner.state = SessionState::Connected;
                    inner.teardown = Some(established.teardown);
                    // Published under the lock so a concurrent teardown cannot slip in between
                    self.view.send_replace(PublishedView::connected(established.document));
                    info!("Session for room {} connected", room);
                    None
                }
                Err(e) => {
                    inner.transport = None;
                    if inner.teardown_requested {
                        info!("Connect to room {} abandoned: {}", room, e);
                        inner.state = SessionState::TornDown;
                    } else {
                        error!("Session for room {} failed: {}", room, e);
                        inner.state = SessionState::Failed(e);
                    }
                    None
                }
            }
        };

        if let Some(teardown) = abandoned {
            info!("Teardown requested while connecting to room {}", room);
            teardown.run().await;
        }
    }

    async fn teardown(&self) {
        let step = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Idle => {
                    inner.state = SessionState::TornDown;
                    TeardownStep::Nothing
                }
                SessionState::Connecting => {
                    inner.teardown_requested = true;
                    match inner.settled.clone() {
                        Some(settled) => TeardownStep::AwaitConnect(settled),
                        None => TeardownStep::Nothing,
                    }
                }
                SessionState::Connected => {
                    inner.state = SessionState::TornDown;
                    inner.transport = None;
                    // Retract before anything is released
                    self.view.send_replace(PublishedView::default());
                    match inner.teardown.take() {
                        Some(teardown) => TeardownStep::Run(teardown),
                        None => TeardownStep::Nothing,
                    }
                }
                SessionState::Failed(_) | SessionState::TornDown => TeardownStep::Nothing,
            }
        };

        match step {
            TeardownStep::Nothing => {}
            TeardownStep::AwaitConnect(mut settled) => {
                let _ = settled.wait_for(|done| *done).await;
            }
            TeardownStep::Run(teardown) => {
                teardown.run().await;
            }
        }
    }

    async fn connect(
        &self,
        room: &RoomId,
        metadata: DocumentMetadata,
        user: UserIdentity,
    ) -> Result<Established, SessionError> {
        let config = &self.config;
        // Opened under the lock: a concurrent drop either prevents the open or finds and aborts it
        let transport = {
            let mut inner = self.inner.lock();
            if inner.teardown_requested {
                return Err(SessionError::Cancelled);
            }
            let transport = self.connector.open(&config.endpoint);
            inner.transport = Some(transport.clone());
            transport
        };
        if let Err(e) = transport.wait_ready(config.connect_timeout).await {
            if let Err(destroy_err) = transport.destroy().await {
                warn!("Failed to destroy unready transport: {}", destroy_err);
            }
            return Err(e);
        }

        let persistent = Arc::new(PersistentDocAdaptor::new());
        let presence = Arc::new(EphemeralPresenceAdaptor::new(
            user,
            Uuid::new_v4().to_string(),
            config.presence_timeout_ms,
        ));
        let mut teardown = Teardown::new(room.clone(), transport.clone(), config.cleanup_rooms);

        match transport.join(room, persistent.clone(), config.join_timeout).await {
            Ok(handle) => teardown.persistent = Some(handle),
            Err(e) => {
                teardown.run().await;
                return Err(e);
            }
        }

        // Same transport, only the channel kind differs
        match transport.join(room, presence.clone(), config.join_timeout).await {
            Ok(handle) => teardown.ephemeral = Some(handle),
            Err(e) => {
                teardown.run().await;
                return Err(e);
            }
        }

        Ok(Established {
            document: ConnectedDocument::new(metadata, persistent.doc(), presence.store()),
            teardown,
        })
    }
}
