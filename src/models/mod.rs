pub mod channel;
pub mod doc;
pub mod error;
pub mod messages;
pub mod relay;
pub mod view;

pub use channel::*;
pub use doc::*;
pub use error::*;
pub use messages::*;
pub use relay::*;
pub use view::*;
