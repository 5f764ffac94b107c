use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two logical streams on a shared connection a call targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Durable CRDT document state
    Persistent,
    /// Presence and cursors, never persisted
    Ephemeral,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Persistent, ChannelKind::Ephemeral];

    pub fn is_durable(self) -> bool {
        match self {
            ChannelKind::Persistent => true,
            ChannelKind::Ephemeral => false,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Persistent => write!(f, "persistent"),
            ChannelKind::Ephemeral => write!(f, "ephemeral"),
        }
    }
}
