use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::adaptor::{ChannelAdaptor, Upstream};
use super::transport::{ChannelHandle, Connector, Outbound, Transport};
use crate::config::Config;
use crate::models::{
    ChannelKind, ChannelMessage, ClientMessage, JoinMessage, PingMessage, RoomId, ServerMessage,
    SessionError,
};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens WebSocket transports
#[derive(Debug, Clone)]
pub struct WsConnector {
    auth_token: Option<String>,
    ping_interval: Duration,
}

impl WsConnector {
    pub fn new(auth_token: Option<String>, ping_interval: Duration) -> Self {
        Self {
            auth_token,
            ping_interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.auth_token.clone(),
            Duration::from_millis(config.ping_interval_ms),
        )
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &str) -> Arc<dyn Transport> {
        WsTransport::open(endpoint, self.auth_token.clone(), self.ping_interval)
    }
}

/// Connection state published by the link task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Ready,
    Failed(String),
    Closed,
}

struct JoinAccepted {
    updates: Vec<u8>,
    version: Vec<u8>,
}

struct Route {
    adaptor: Arc<dyn ChannelAdaptor>,
    pending: Option<oneshot::Sender<Result<JoinAccepted, String>>>,
}

type RouteKey = (RoomId, ChannelKind);
type Routes = Arc<Mutex<HashMap<RouteKey, Route>>>;

/// One WebSocket to a collaboration server, multiplexing channels by room and kind
pub struct WsTransport {
    endpoint: String,
    peer: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    status: watch::Receiver<LinkStatus>,
    routes: Routes,
    link: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Start connecting to `endpoint` in the background
    pub fn open(endpoint: &str, auth_token: Option<String>, ping_interval: Duration) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Connecting);
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let peer = Uuid::new_v4().to_string();

        let link = tokio::spawn(run_link(LinkTask {
            endpoint: endpoint.to_string(),
            auth_token,
            ping_interval,
            peer: peer.clone(),
            outbound: outbound_rx,
            status: status_tx,
            routes: routes.clone(),
        }));

        Arc::new(Self {
            endpoint: endpoint.to_string(),
            peer,
            outbound: outbound_tx,
            status: status_rx,
            routes,
            link: Mutex::new(Some(link)),
        })
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&self, msg: ClientMessage) -> Result<(), SessionError> {
        self.outbound
            .send(Outbound::Frame(msg))
            .map_err(|_| SessionError::TransportClosed)
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), SessionError> {
        let mut status = self.status.clone();
        let settled = tokio::time::timeout(
            timeout,
            status.wait_for(|s| *s != LinkStatus::Connecting),
        )
        .await;

        let current = match settled {
            Err(_) => {
                return Err(SessionError::connection(
                    &self.endpoint,
                    format!("not ready after {}ms", timeout.as_millis()),
                ))
            }
            Ok(Err(_)) => return Err(SessionError::connection(&self.endpoint, "link task ended")),
            Ok(Ok(status)) => status.clone(),
        };

        match current {
            LinkStatus::Ready => Ok(()),
            LinkStatus::Failed(reason) => Err(SessionError::connection(&self.endpoint, reason)),
            LinkStatus::Closed | LinkStatus::Connecting => {
                Err(SessionError::connection(&self.endpoint, "connection closed"))
            }
        }
    }

    async fn join(
        &self,
        room: &RoomId,
        adaptor: Arc<dyn ChannelAdaptor>,
        timeout: Duration,
    ) -> Result<Box<dyn ChannelHandle>, SessionError> {
        let kind = adaptor.kind();
        let key: RouteKey = (room.clone(), kind);
        let (accepted_tx, accepted_rx) = oneshot::channel();

        {
            let mut routes = self.routes.lock();
            if routes.contains_key(&key) {
                return Err(SessionError::join(room.as_str(), kind, "channel already joined"));
            }
            routes.insert(
                key.clone(),
                Route {
                    adaptor: adaptor.clone(),
                    pending: Some(accepted_tx),
                },
            );
        }

        let request = ClientMessage::Join(JoinMessage {
            room_id: room.clone(),
            channel: kind,
            version: adaptor.join_payload(),
        });
        if let Err(e) = self.send(request) {
            self.routes.lock().remove(&key);
            return Err(SessionError::join(room.as_str(), kind, e.to_string()));
        }
        debug!("Join requested for {} ({})", room, kind);

        let reply = tokio::time::timeout(timeout, accepted_rx).await;
        let accepted = match reply {
            Ok(Ok(Ok(accepted))) => accepted,
            Ok(Ok(Err(reason))) => {
                self.routes.lock().remove(&key);
                return Err(SessionError::join(room.as_str(), kind, reason));
            }
            Ok(Err(_)) => {
                self.routes.lock().remove(&key);
                return Err(SessionError::join(room.as_str(), kind, "connection closed"));
            }
            Err(_) => {
                self.routes.lock().remove(&key);
                return Err(SessionError::join(
                    room.as_str(),
                    kind,
                    format!("no reply after {}ms", timeout.as_millis()),
                ));
            }
        };

        let upstream = Upstream::new(room.clone(), kind, self.outbound.clone());
        match adaptor.on_joined(&accepted.updates, &accepted.version) {
            Ok(Some(catch_up)) if !catch_up.is_empty() => {
                upstream.push(catch_up);
            }
            Ok(_) => {}
            Err(e) => {
                // The server considers us joined, so tell it we are gone
                let _ = self.send(ClientMessage::Leave(ChannelMessage {
                    room_id: room.clone(),
                    channel: kind,
                }));
                self.routes.lock().remove(&key);
                return Err(SessionError::join(room.as_str(), kind, e.to_string()));
            }
        }
        adaptor.attach(upstream);
        info!("Joined {} channel of room {}", kind, room);

        Ok(Box::new(WsChannelHandle {
            key,
            adaptor,
            outbound: self.outbound.clone(),
            routes: self.routes.clone(),
            left: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn cleanup_room(&self, room: &RoomId, kind: ChannelKind) -> Result<(), SessionError> {
        self.send(ClientMessage::Cleanup(ChannelMessage {
            room_id: room.clone(),
            channel: kind,
        }))
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        let link = self.link.lock().take();
        let Some(mut link) = link else {
            return Ok(());
        };

        if *self.status.borrow() == LinkStatus::Connecting {
            link.abort();
            return Ok(());
        }

        // Queued after every frame sent so far, so leave and cleanup go out first
        let _ = self.outbound.send(Outbound::Close);
        if tokio::time::timeout(CLOSE_GRACE, &mut link).await.is_err() {
            warn!("Link to {} did not close in time, aborting", self.endpoint);
            link.abort();
        }
        info!("Transport to {} destroyed", self.endpoint);
        Ok(())
    }

    fn abort(&self) {
        if let Some(link) = self.link.lock().take() {
            debug!("Aborting link to {}", self.endpoint);
            link.abort();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.abort();
    }
}

struct WsChannelHandle {
    key: RouteKey,
    adaptor: Arc<dyn ChannelAdaptor>,
    outbound: mpsc::UnboundedSender<Outbound>,
    routes: Routes,
    left: AtomicBool,
    destroyed: AtomicBool,
}

#[async_trait]
impl ChannelHandle for WsChannelHandle {
    fn kind(&self) -> ChannelKind {
        self.key.1
    }

    async fn leave(&self) -> Result<(), SessionError> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Detaching may still push a final update (presence retraction) ahead of the leave
        self.adaptor.detach();
        self.outbound
            .send(Outbound::Frame(ClientMessage::Leave(ChannelMessage {
                room_id: self.key.0.clone(),
                channel: self.key.1,
            })))
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.adaptor.is_attached() {
            self.adaptor.detach();
        }
        self.routes.lock().remove(&self.key);
        Ok(())
    }
}

struct LinkTask {
    endpoint: String,
    auth_token: Option<String>,
    ping_interval: Duration,
    peer: String,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    status: watch::Sender<LinkStatus>,
    routes: Routes,
}

fn build_request(endpoint: &str, auth_token: Option<&str>) -> Result<Request, String> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| format!("Invalid endpoint '{}': {}", endpoint, e))?;
    if let Some(token) = auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| format!("Invalid auth token: {}", e))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

async fn run_link(mut task: LinkTask) {
    let request = match build_request(&task.endpoint, task.auth_token.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            error!("{}", e);
            task.status.send_replace(LinkStatus::Failed(e));
            return;
        }
    };

    let socket = match connect_async(request).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            error!("Failed to connect to {}: {}", task.endpoint, e);
            task.status.send_replace(LinkStatus::Failed(e.to_string()));
            return;
        }
    };
    info!("Connected to {}", task.endpoint);
    task.status.send_replace(LinkStatus::Ready);

    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(task.ping_interval);
    // The first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            outbound = task.outbound.recv() => match outbound {
                Some(Outbound::Frame(msg)) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::text(text)).await {
                        error!("Failed to send frame to {}: {}", task.endpoint, e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(&task.routes, text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Server closed the connection to {}", task.endpoint);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Connection to {} failed: {}", task.endpoint, e);
                    break;
                }
            },
            _ = ping.tick() => {
                let frame = ClientMessage::Ping(PingMessage { peer: task.peer.clone() });
                if let Ok(text) = serde_json::to_string(&frame) {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Nobody will answer the pending joins anymore
    for route in task.routes.lock().values_mut() {
        if let Some(pending) = route.pending.take() {
            let _ = pending.send(Err("connection closed".to_string()));
        }
    }
    task.status.send_replace(LinkStatus::Closed);
}

fn dispatch(routes: &Mutex<HashMap<RouteKey, Route>>, text: &str) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Ignoring unreadable frame: {}", e);
            return;
        }
    };

    match msg {
        ServerMessage::Joined(joined) => {
            let key = (joined.room_id, joined.channel);
            let pending = routes.lock().get_mut(&key).and_then(|r| r.pending.take());
            match pending {
                Some(pending) => {
                    let _ = pending.send(Ok(JoinAccepted {
                        updates: joined.updates,
                        version: joined.version,
                    }));
                }
                None => warn!("Unexpected join reply for {} ({})", key.0, key.1),
            }
        }
        ServerMessage::JoinError(rejected) => {
            let key = (rejected.room_id, rejected.channel);
            let pending = routes.lock().get_mut(&key).and_then(|r| r.pending.take());
            if let Some(pending) = pending {
                let _ = pending.send(Err(rejected.message));
            }
        }
        ServerMessage::Update(update) => {
            let key = (update.room_id, update.channel);
            let adaptor = routes.lock().get(&key).map(|r| r.adaptor.clone());
            match adaptor {
                Some(adaptor) => {
                    if let Err(e) = adaptor.apply_remote(&update.delta) {
                        warn!("Failed to apply update for {} ({}): {}", key.0, key.1, e);
                    }
                }
                None => debug!("Dropping update for unjoined channel {} ({})", key.0, key.1),
            }
        }
        ServerMessage::Pong(pong) => debug!("Pong at {}", pong.date),
    }
}
