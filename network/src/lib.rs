#[macro_use]
extern crate log;

pub mod close_type;
pub mod peer;
pub mod peer_channel;

pub use self::close_type::CloseType;
pub use self::peer::Peer;
pub use self::peer_channel::{NetworkSink, PeerChannel, SendError};
