#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use consensus::{
    ConsensusAgent, ConsensusAgentConfig, ConsensusAgentEvent, ConsensusPolicy, InvRequestManager,
    VectorRequester,
};
use hash::{Blake2bHash, Blake2bHasher, Hasher};
use network::{CloseType, NetworkSink, Peer, PeerChannel, SendError};
use network_messages::{InvVector, Message, MessageType};
use network_primitives::Subscription;
use primitives::block::{Block, BlockBody, BlockHeader};
use primitives::transaction::Transaction;
use primitives::{Address, Coin};
use utils::merkle::compute_root_from_hashes;

/// A timestamp safely in the past for `Block::verify`.
pub const BLOCK_TIME: u64 = 1_600_000_000;

pub fn hash_of(tag: &[u8]) -> Blake2bHash {
    Blake2bHasher::default().digest(tag)
}

pub fn address(seed: u8) -> Address {
    Address::from_bytes([seed; 20])
}

/// A transaction of 62 serialized bytes; `fee` in smallest units.
pub fn tx(seed: u8, fee: u64) -> Transaction {
    Transaction::new(
        address(seed),
        address(seed.wrapping_add(100)),
        Coin::from_units(1000),
        Coin::from_units(fee),
        1,
        vec![],
    )
}

pub fn block(height: u32, prev_hash: Blake2bHash, transactions: Vec<Transaction>) -> Block {
    block_with_interlink(height, prev_hash, transactions, vec![])
}

pub fn block_with_interlink(
    height: u32,
    prev_hash: Blake2bHash,
    transactions: Vec<Transaction>,
    interlink: Vec<Blake2bHash>,
) -> Block {
    let body = BlockBody::new(transactions);
    let header = BlockHeader {
        version: 1,
        prev_hash,
        interlink_hash: compute_root_from_hashes(&interlink),
        body_hash: body.hash(),
        height,
        timestamp: BLOCK_TIME + u64::from(height),
    };
    Block::new(header, interlink, Some(body))
}

#[derive(Default)]
pub struct MockSink {
    pub sent: Mutex<Vec<Message>>,
    pub closes: Mutex<Vec<CloseType>>,
}

impl NetworkSink for MockSink {
    fn send(&self, msg: Message) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    fn close(&self, ty: CloseType) {
        self.closes.lock().unwrap().push(ty);
    }
}

impl MockSink {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, ty: MessageType) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|msg| msg.ty() == ty)
            .collect()
    }

    pub fn count(&self, ty: MessageType) -> usize {
        self.sent_of(ty).len()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn closes(&self) -> Vec<CloseType> {
        self.closes.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct MockPolicy {
    pub blocks: Mutex<HashMap<Blake2bHash, Block>>,
    pub mempool: Mutex<HashMap<Blake2bHash, Transaction>>,
    pub head: Mutex<Option<BlockHeader>>,
    pub subscribed_mempool: Mutex<Vec<Transaction>>,
    pub processed_blocks: Mutex<Vec<Blake2bHash>>,
    pub processed_headers: Mutex<Vec<Blake2bHash>>,
    pub processed_transactions: Mutex<Vec<Blake2bHash>>,
    pub request_headers: Mutex<bool>,
}

impl MockPolicy {
    pub fn add_block(&self, block: &Block) {
        self.blocks.lock().unwrap().insert(block.hash(), block.clone());
    }

    pub fn add_mempool_tx(&self, transaction: &Transaction) {
        self.mempool
            .lock()
            .unwrap()
            .insert(transaction.hash(), transaction.clone());
    }
}

impl ConsensusPolicy for MockPolicy {
    fn get_block(
        &self,
        hash: &Blake2bHash,
        _include_forks: bool,
        _include_body: bool,
    ) -> Option<Block> {
        self.blocks.lock().unwrap().get(hash).cloned()
    }

    fn get_raw_block(&self, hash: &Blake2bHash, _include_forks: bool) -> Option<Block> {
        self.blocks.lock().unwrap().get(hash).cloned()
    }

    fn get_transaction(&self, hash: &Blake2bHash) -> Option<Transaction> {
        self.mempool.lock().unwrap().get(hash).cloned()
    }

    fn get_head(&self) -> BlockHeader {
        self.head
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| block(1, Blake2bHash::default(), vec![]).header)
    }

    fn will_request_headers(&self) -> bool {
        *self.request_headers.lock().unwrap()
    }

    fn get_subscribed_mempool_transactions(
        &self,
        _subscription: &Subscription,
        max: usize,
    ) -> Vec<Transaction> {
        let transactions = self.subscribed_mempool.lock().unwrap();
        transactions.iter().take(max).cloned().collect()
    }

    fn mempool_throttle(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn process_block(&self, hash: &Blake2bHash, _block: Block) {
        self.processed_blocks.lock().unwrap().push(hash.clone());
    }

    fn process_header(&self, hash: &Blake2bHash, _header: BlockHeader) {
        self.processed_headers.lock().unwrap().push(hash.clone());
    }

    fn process_transaction(&self, hash: &Blake2bHash, _transaction: Transaction) {
        self.processed_transactions.lock().unwrap().push(hash.clone());
    }
}

/// Coordinator stub; with `auto_request` every ask immediately turns into a
/// `request_vector` callback on the asking agent.
pub struct RecordingInvManager {
    pub auto_request: bool,
    pub asked: Mutex<Vec<InvVector>>,
    pub received: Mutex<Vec<InvVector>>,
    pub not_received: Mutex<Vec<InvVector>>,
}

impl RecordingInvManager {
    pub fn new(auto_request: bool) -> Arc<Self> {
        Arc::new(RecordingInvManager {
            auto_request,
            asked: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            not_received: Mutex::new(Vec::new()),
        })
    }
}

impl InvRequestManager for RecordingInvManager {
    fn ask_to_request_vector(&self, agent: &Arc<dyn VectorRequester>, vector: &InvVector) {
        self.asked.lock().unwrap().push(vector.clone());
        if self.auto_request {
            agent.request_vector(vector.clone());
        }
    }

    fn note_vector_received(&self, vector: &InvVector) {
        self.received.lock().unwrap().push(vector.clone());
    }

    fn note_vector_not_received(&self, _agent: &Arc<dyn VectorRequester>, vector: &InvVector) {
        self.not_received.lock().unwrap().push(vector.clone());
    }
}

/// Scaled-down timings so the scenarios run in milliseconds.
pub fn test_config() -> ConsensusAgentConfig {
    ConsensusAgentConfig {
        request_throttle: Duration::from_millis(50),
        request_timeout: Duration::from_millis(150),
        subscription_change_grace_period: Duration::from_millis(100),
        knows_object_after_inv_delay: Duration::from_millis(50),
        block_proof_request_timeout: Duration::from_millis(150),
        transactions_proof_request_timeout: Duration::from_millis(150),
        transaction_receipts_request_timeout: Duration::from_millis(150),
        // Keep periodic relay flushing out of the way unless a test
        // shortens it again.
        transaction_relay_interval: Duration::from_secs(600),
        free_transaction_relay_interval: Duration::from_secs(600),
        ..ConsensusAgentConfig::default()
    }
}

pub struct TestPeer {
    pub sink: Arc<MockSink>,
    pub channel: Arc<PeerChannel>,
    pub peer: Arc<Peer>,
    pub policy: Arc<MockPolicy>,
    pub agent: Arc<ConsensusAgent<MockPolicy>>,
    pub events: Arc<Mutex<Vec<ConsensusAgentEvent>>>,
}

impl TestPeer {
    pub fn new(inv_mgr: Arc<dyn InvRequestManager>, config: ConsensusAgentConfig) -> Self {
        Self::with_version(inv_mgr, config, Peer::VERSION_PROOFS_BY_HASH)
    }

    pub fn with_version(
        inv_mgr: Arc<dyn InvRequestManager>,
        config: ConsensusAgentConfig,
        version: u32,
    ) -> Self {
        let sink = Arc::new(MockSink::default());
        let channel = Arc::new(PeerChannel::new(sink.clone()));
        let peer = Arc::new(Peer::new(channel.clone(), version, hash_of(b"peer-head")));
        let policy = Arc::new(MockPolicy::default());
        let agent = ConsensusAgent::new_with_config(policy.clone(), peer.clone(), inv_mgr, config);

        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        agent.notifier.write().register(move |event: &ConsensusAgentEvent| {
            events2.lock().unwrap().push(event.clone());
        });

        // Drop the get-head issued during construction; tests start clean.
        sink.clear();

        TestPeer {
            sink,
            channel,
            peer,
            policy,
            agent,
            events,
        }
    }

    /// Injects an inbound message as the transport would.
    pub fn deliver(&self, msg: Message) {
        self.channel.on_message(msg);
    }

    pub fn events(&self) -> Vec<ConsensusAgentEvent> {
        self.events.lock().unwrap().clone()
    }
}

pub fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}
