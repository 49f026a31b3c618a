use std::time::Duration;

use hash::Blake2bHash;
use network_messages::InvVector;
use network_primitives::Subscription;
use primitives::block::{Block, BlockHeader};
use primitives::transaction::Transaction;

/// Chain access and processing hooks supplied by the node flavor driving the
/// agent (full, light or nano client).
///
/// The lookup methods are required; the remaining hooks default to the
/// behavior of a node that fetches everything and processes nothing.
/// Announcement events are published on the agent's notifier instead.
pub trait ConsensusPolicy: Send + Sync + 'static {
    /// Looks up a block by hash, optionally considering fork blocks and
    /// including the body.
    fn get_block(
        &self,
        hash: &Blake2bHash,
        include_forks: bool,
        include_body: bool,
    ) -> Option<Block>;

    /// Looks up a block with its body for serving `get-data`.
    fn get_raw_block(&self, hash: &Blake2bHash, include_forks: bool) -> Option<Block>;

    /// Looks up a transaction in the local mempool.
    fn get_transaction(&self, hash: &Blake2bHash) -> Option<Transaction>;

    /// The head header of the local chain.
    fn get_head(&self) -> BlockHeader;

    /// Whether an announced vector should be fetched at all.
    fn should_request_data(&self, _vector: &InvVector) -> bool {
        true
    }

    /// When true, announced blocks are fetched via `get-header` instead of
    /// `get-data`.
    fn will_request_headers(&self) -> bool {
        false
    }

    /// Mempool transactions matching the peer's subscription, used to answer
    /// an inbound `mempool` request.
    fn get_subscribed_mempool_transactions(
        &self,
        _subscription: &Subscription,
        _max: usize,
    ) -> Vec<Transaction> {
        Vec::new()
    }

    /// Pause between full inv batches while answering a `mempool` request.
    fn mempool_throttle(&self) -> Duration {
        Duration::from_millis(1000)
    }

    fn process_block(&self, _hash: &Blake2bHash, _block: Block) {}

    fn process_header(&self, _hash: &Blake2bHash, _header: BlockHeader) {}

    fn process_transaction(&self, _hash: &Blake2bHash, _transaction: Transaction) {}
}
