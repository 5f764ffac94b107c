//! Collaboration session layer for colabri documents.
//!
//! A [`session::SessionManager`] opens one WebSocket to the collaboration server
//! per mounted document, joins the persistent CRDT channel and the ephemeral
//! presence channel of the document's room over it, publishes the merged
//! [`models::ConnectedDocument`] and tears everything down in a fixed order.
//! The `colabri-relay` binary hosts an in-memory server speaking the same protocol.

pub mod clients;
pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
pub mod session;
pub mod websocket;
pub mod ws;

pub use models::{ChannelKind, DocumentIdentity, DocumentKind, DocumentMetadata, RoomId, SessionError, UserIdentity};
pub use session::{Evaluation, SessionConfig, SessionContext, SessionManager, SessionState};
