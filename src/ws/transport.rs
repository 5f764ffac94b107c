use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::adaptor::ChannelAdaptor;
use crate::models::{ChannelKind, ClientMessage, RoomId, SessionError};

/// Items on a transport's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ClientMessage),
    /// Close the socket once everything queued before it has been written
    Close,
}

/// Opens transport connections. One call, one physical connection.
pub trait Connector: Send + Sync {
    fn open(&self, endpoint: &str) -> Arc<dyn Transport>;
}

/// One connection to a collaboration server, carrying any number of channels
#[async_trait]
pub trait Transport: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Suspend until the connection is ready, failing with `ConnectionFailure`
    /// if it closes or `timeout` passes first.
    async fn wait_ready(&self, timeout: Duration) -> Result<(), SessionError>;

    /// Join `room` on the channel kind of `adaptor` and attach the adaptor to it.
    async fn join(
        &self,
        room: &RoomId,
        adaptor: Arc<dyn ChannelAdaptor>,
        timeout: Duration,
    ) -> Result<Box<dyn ChannelHandle>, SessionError>;

    /// Ask the server to reclaim its per-room state. Safe without a local handle.
    async fn cleanup_room(&self, room: &RoomId, kind: ChannelKind) -> Result<(), SessionError>;

    /// Close the underlying socket.
    async fn destroy(&self) -> Result<(), SessionError>;

    /// Drop the connection at once, without the close handshake. Usable from `Drop`;
    /// a later `destroy` is a no-op.
    fn abort(&self);
}

/// A joined channel. Both operations are idempotent.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Tell the server this client is leaving the channel
    async fn leave(&self) -> Result<(), SessionError>;

    /// Release the local resources of the channel
    async fn destroy(&self) -> Result<(), SessionError>;
}
