use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use super::{ChannelKind, RoomId};

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub room_id: RoomId,
    pub channel: ChannelKind,
    /// What the client already holds (an encoded version vector for persistent channels)
    #[serde_as(as = "Base64")]
    #[serde(default)]
    pub version: Vec<u8>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    pub room_id: RoomId,
    pub channel: ChannelKind,
    #[serde_as(as = "Base64")]
    pub delta: Vec<u8>,
}

/// Addresses one channel of a room. Used by leave and cleanup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub room_id: RoomId,
    pub channel: ChannelKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {
    pub peer: String,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMessage {
    pub room_id: RoomId,
    pub channel: ChannelKind,
    /// State the client is missing
    #[serde_as(as = "Base64")]
    pub updates: Vec<u8>,
    /// The room's version after the join, empty for ephemeral rooms
    #[serde_as(as = "Base64")]
    #[serde(default)]
    pub version: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinErrorMessage {
    pub room_id: RoomId,
    pub channel: ChannelKind,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

/// Frames sent by a session to the collaboration server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join(JoinMessage),
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "leave")]
    Leave(ChannelMessage),
    #[serde(rename = "cleanup")]
    Cleanup(ChannelMessage),
    #[serde(rename = "ping")]
    Ping(PingMessage),
}

/// Frames sent by the collaboration server to a session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined(JoinedMessage),
    #[serde(rename = "joinError")]
    JoinError(JoinErrorMessage),
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}
