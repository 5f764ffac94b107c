pub mod adaptor;
pub mod loro_adaptor;
pub mod presence;
pub mod transport;
pub mod wsclient;

pub use adaptor::{ChannelAdaptor, LiveState, Upstream};
pub use loro_adaptor::PersistentDocAdaptor;
pub use presence::{EphemeralPresenceAdaptor, PresenceCursor, PresenceState, PresenceStore};
pub use transport::{ChannelHandle, Connector, Outbound, Transport};
pub use wsclient::{LinkStatus, WsConnector, WsTransport};
