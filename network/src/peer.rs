use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use hash::Blake2bHash;
use primitives::block::BlockHeader;
use utils::unique_id::UniqueId;

use crate::peer_channel::PeerChannel;

/// A connected remote peer as seen after the handshake.
pub struct Peer {
    pub channel: Arc<PeerChannel>,
    pub version: u32,
    /// Head hash announced during the handshake.
    pub head_hash: Blake2bHash,
    /// Most recent head header learned from the peer.
    head: RwLock<Option<BlockHeader>>,
    pub id: UniqueId,
}

impl Peer {
    /// First protocol version carrying the by-hashes proof requests and
    /// height-addressed block proofs.
    pub const VERSION_PROOFS_BY_HASH: u32 = 2;

    pub fn new(channel: Arc<PeerChannel>, version: u32, head_hash: Blake2bHash) -> Self {
        Peer {
            channel,
            version,
            head_hash,
            head: RwLock::new(None),
            id: UniqueId::new(),
        }
    }

    pub fn head(&self) -> Option<BlockHeader> {
        self.head.read().clone()
    }

    pub fn set_head(&self, header: BlockHeader) {
        *self.head.write() = Some(header);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "peer{}", self.id)
    }
}
