use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use collections::{LimitHashSet, UniqueQueue};
use futures::channel::oneshot;
use hash::Blake2bHash;
use network::Peer;
use network_messages::{InvVector, Message};
use network_primitives::Subscription;
use primitives::block::BlockHeader;
use utils::mutable_once::MutableOnce;
use utils::observer::{weak_listener, weak_passthru_listener, Notifier};
use utils::rate_limit::RateLimit;
use utils::synchronizer::MultiSynchronizer;
use utils::throttled_queue::ThrottledQueue;
use utils::timers::Timers;
use utils::unique_id::UniqueId;

use crate::error::RequestError;
use crate::inv_request_manager::{InvRequestManager, VectorRequester};
use crate::policy::ConsensusPolicy;

use self::proofs::{BlockProofRequest, TransactionReceiptsRequest, TransactionsProofRequest};
use self::requests::RequestedObject;

mod inventory;
mod proofs;
mod requests;

/// Announcement and progress events published by the agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusAgentEvent {
    NewBlockAnnounced(Blake2bHash),
    KnownBlockAnnounced(Blake2bHash),
    NewTransactionAnnounced(Blake2bHash),
    KnownTransactionAnnounced(Blake2bHash),
    NoUnknownObjects,
    AllObjectsReceived,
    AllObjectsProcessed,
    Close,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum ConsensusAgentTimer {
    GetDataThrottle,
    GetData,
    GetHead,
    TxInvVectors,
    FreeTxInvVectors,
    Request(InvVector),
    KnowsObject(InvVector),
}

/// Protocol timings and bounds. `Default` yields the canonical constants;
/// tests shrink the timings.
#[derive(Clone, Debug)]
pub struct ConsensusAgentConfig {
    /// Queued vectors that trigger an immediate `get-data`.
    pub request_threshold: usize,
    /// Collection window after the last inv before a `get-data` goes out.
    pub request_throttle: Duration,
    /// Timeout per `get-data` batch and per direct request.
    pub request_timeout: Duration,
    /// Maximum vectors per `get-data`/`get-header` batch.
    pub request_vectors_max: usize,
    pub known_objects_count_max: usize,
    pub request_blocks_waiting_max: usize,
    pub request_transactions_waiting_max: usize,
    pub transaction_relay_interval: Duration,
    pub transactions_at_once: usize,
    pub transactions_per_second: usize,
    pub free_transaction_relay_interval: Duration,
    pub free_transactions_at_once: usize,
    pub free_transactions_per_second: usize,
    pub free_transaction_size_per_interval: usize,
    /// Minimum fee per byte for a transaction not to be relayed as "free".
    pub transaction_relay_fee_min: u64,
    /// Token refill period of the relay and request transaction queues.
    pub transaction_throttle: Duration,
    pub subscription_change_grace_period: Duration,
    pub head_request_interval: Duration,
    pub knows_object_after_inv_delay: Duration,
    pub block_proof_request_timeout: Duration,
    pub transactions_proof_request_timeout: Duration,
    pub transaction_receipts_request_timeout: Duration,
    pub mempool_entries_max: usize,
    /// Served `mempool` requests per minute.
    pub mempool_rate_limit: usize,
}

impl ConsensusAgentConfig {
    pub const REQUEST_THRESHOLD: usize = 50;
    pub const REQUEST_THROTTLE: Duration = Duration::from_millis(500);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REQUEST_VECTORS_MAX: usize = 1000;
    pub const KNOWN_OBJECTS_COUNT_MAX: usize = 40000;
    pub const REQUEST_BLOCKS_WAITING_MAX: usize = 5000;
    pub const REQUEST_TRANSACTIONS_WAITING_MAX: usize = 5000;
    pub const TRANSACTION_RELAY_INTERVAL: Duration = Duration::from_millis(5000);
    pub const TRANSACTIONS_AT_ONCE: usize = 100;
    pub const TRANSACTIONS_PER_SECOND: usize = 10;
    pub const FREE_TRANSACTION_RELAY_INTERVAL: Duration = Duration::from_millis(6000);
    pub const FREE_TRANSACTIONS_AT_ONCE: usize = 10;
    pub const FREE_TRANSACTIONS_PER_SECOND: usize = 1;
    pub const FREE_TRANSACTION_SIZE_PER_INTERVAL: usize = 15000;
    pub const TRANSACTION_RELAY_FEE_MIN: u64 = 1;
    pub const TRANSACTION_THROTTLE: Duration = Duration::from_millis(1000);
    pub const SUBSCRIPTION_CHANGE_GRACE_PERIOD: Duration = Duration::from_secs(3);
    pub const HEAD_REQUEST_INTERVAL: Duration = Duration::from_secs(100);
    pub const KNOWS_OBJECT_AFTER_INV_DELAY: Duration = Duration::from_secs(3);
    pub const BLOCK_PROOF_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const TRANSACTIONS_PROOF_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const TRANSACTION_RECEIPTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const MEMPOOL_ENTRIES_MAX: usize = 10_000;
    pub const MEMPOOL_RATE_LIMIT: usize = 3;
}

impl Default for ConsensusAgentConfig {
    fn default() -> Self {
        ConsensusAgentConfig {
            request_threshold: Self::REQUEST_THRESHOLD,
            request_throttle: Self::REQUEST_THROTTLE,
            request_timeout: Self::REQUEST_TIMEOUT,
            request_vectors_max: Self::REQUEST_VECTORS_MAX,
            known_objects_count_max: Self::KNOWN_OBJECTS_COUNT_MAX,
            request_blocks_waiting_max: Self::REQUEST_BLOCKS_WAITING_MAX,
            request_transactions_waiting_max: Self::REQUEST_TRANSACTIONS_WAITING_MAX,
            transaction_relay_interval: Self::TRANSACTION_RELAY_INTERVAL,
            transactions_at_once: Self::TRANSACTIONS_AT_ONCE,
            transactions_per_second: Self::TRANSACTIONS_PER_SECOND,
            free_transaction_relay_interval: Self::FREE_TRANSACTION_RELAY_INTERVAL,
            free_transactions_at_once: Self::FREE_TRANSACTIONS_AT_ONCE,
            free_transactions_per_second: Self::FREE_TRANSACTIONS_PER_SECOND,
            free_transaction_size_per_interval: Self::FREE_TRANSACTION_SIZE_PER_INTERVAL,
            transaction_relay_fee_min: Self::TRANSACTION_RELAY_FEE_MIN,
            transaction_throttle: Self::TRANSACTION_THROTTLE,
            subscription_change_grace_period: Self::SUBSCRIPTION_CHANGE_GRACE_PERIOD,
            head_request_interval: Self::HEAD_REQUEST_INTERVAL,
            knows_object_after_inv_delay: Self::KNOWS_OBJECT_AFTER_INV_DELAY,
            block_proof_request_timeout: Self::BLOCK_PROOF_REQUEST_TIMEOUT,
            transactions_proof_request_timeout: Self::TRANSACTIONS_PROOF_REQUEST_TIMEOUT,
            transaction_receipts_request_timeout: Self::TRANSACTION_RECEIPTS_REQUEST_TIMEOUT,
            mempool_entries_max: Self::MEMPOOL_ENTRIES_MAX,
            mempool_rate_limit: Self::MEMPOOL_RATE_LIMIT,
        }
    }
}

pub(crate) struct ConsensusAgentState {
    /// Set by the owning node once the initial sync with this peer finished.
    pub(crate) synced: bool,

    /// Objects the peer has seen, announced or asked for.
    pub(crate) known_objects: LimitHashSet<InvVector>,

    /// Announced vectors collected for the next `get-data` batch.
    pub(crate) blocks_to_request: UniqueQueue<InvVector>,
    pub(crate) txs_to_request: ThrottledQueue<InvVector>,

    /// Relay out-queues.
    pub(crate) waiting_tx_inv_vectors: ThrottledQueue<InvVector>,
    pub(crate) waiting_free_tx_inv_vectors: ThrottledQueue<inventory::FreeTransactionVector>,

    /// Vectors of the current `get-data` batch.
    pub(crate) objects_in_flight: HashSet<InvVector>,

    /// Vectors whose batch timed out; late deliveries are accepted silently.
    pub(crate) objects_that_flew: HashSet<InvVector>,

    /// Vectors whose payload is being processed by the policy.
    pub(crate) objects_processing: HashSet<InvVector>,

    pub(crate) remote_subscription: Subscription,
    pub(crate) local_subscription: Subscription,
    pub(crate) target_subscription: Subscription,
    pub(crate) last_subscription_change: Instant,

    /// Waiters of direct `request_block`/`request_transaction` calls.
    pub(crate) pending_requests:
        HashMap<InvVector, Vec<oneshot::Sender<Result<RequestedObject, RequestError>>>>,

    /// Single-slot pending proof requests, one per family.
    pub(crate) block_proof_request: Option<BlockProofRequest>,
    pub(crate) transactions_proof_request: Option<TransactionsProofRequest>,
    pub(crate) transaction_receipts_request: Option<TransactionReceiptsRequest>,

    pub(crate) mempool_limit: RateLimit,
}

/// Mediates one peer-to-peer link: announcements, object exchange, relay and
/// verified proof requests. One instance is bound to one peer for the
/// lifetime of the connection.
pub struct ConsensusAgent<P: ConsensusPolicy> {
    pub(crate) policy: Arc<P>,
    pub peer: Arc<Peer>,
    pub(crate) inv_mgr: Arc<dyn InvRequestManager>,
    pub(crate) config: ConsensusAgentConfig,
    pub(crate) synchronizer: MultiSynchronizer,
    pub(crate) state: RwLock<ConsensusAgentState>,
    pub notifier: RwLock<Notifier<'static, ConsensusAgentEvent>>,
    pub(crate) self_weak: MutableOnce<Weak<ConsensusAgent<P>>>,
    pub(crate) timers: Timers<ConsensusAgentTimer>,
    closed: AtomicBool,
    id: UniqueId,
}

pub(crate) const SYNC_ON_INV: &str = "onInv";
pub(crate) const SYNC_GET_BLOCK_PROOF: &str = "getBlockProof";
pub(crate) const SYNC_GET_TRANSACTIONS_PROOF: &str = "getTransactionsProof";
pub(crate) const SYNC_GET_TRANSACTION_RECEIPTS: &str = "getTransactionReceipts";

impl<P: ConsensusPolicy> ConsensusAgent<P> {
    pub fn new(policy: Arc<P>, peer: Arc<Peer>, inv_mgr: Arc<dyn InvRequestManager>) -> Arc<Self> {
        Self::new_with_config(policy, peer, inv_mgr, ConsensusAgentConfig::default())
    }

    pub fn new_with_config(
        policy: Arc<P>,
        peer: Arc<Peer>,
        inv_mgr: Arc<dyn InvRequestManager>,
        config: ConsensusAgentConfig,
    ) -> Arc<Self> {
        let this = Arc::new(ConsensusAgent {
            policy,
            peer,
            inv_mgr,
            synchronizer: MultiSynchronizer::new(),
            state: RwLock::new(ConsensusAgentState {
                synced: false,
                known_objects: LimitHashSet::new(config.known_objects_count_max),
                blocks_to_request: UniqueQueue::with_max_length(config.request_blocks_waiting_max),
                txs_to_request: ThrottledQueue::new(
                    config.transactions_at_once + config.free_transactions_at_once,
                    config.transaction_throttle,
                    config.transactions_per_second + config.free_transactions_per_second,
                    Some(config.request_transactions_waiting_max),
                ),
                waiting_tx_inv_vectors: ThrottledQueue::new(
                    config.transactions_at_once,
                    config.transaction_throttle,
                    config.transactions_per_second,
                    Some(config.request_transactions_waiting_max),
                ),
                waiting_free_tx_inv_vectors: ThrottledQueue::new(
                    config.free_transactions_at_once,
                    config.transaction_throttle,
                    config.free_transactions_per_second,
                    Some(config.request_transactions_waiting_max),
                ),
                objects_in_flight: HashSet::new(),
                objects_that_flew: HashSet::new(),
                objects_processing: HashSet::new(),
                // We announce nothing until the peer subscribes.
                remote_subscription: Subscription::None,
                local_subscription: Subscription::None,
                target_subscription: Subscription::None,
                last_subscription_change: Instant::now(),
                pending_requests: HashMap::new(),
                block_proof_request: None,
                transactions_proof_request: None,
                transaction_receipts_request: None,
                mempool_limit: RateLimit::new_per_minute(config.mempool_rate_limit),
            }),
            notifier: RwLock::new(Notifier::new()),
            self_weak: MutableOnce::new(Weak::new()),
            timers: Timers::new(),
            closed: AtomicBool::new(false),
            id: UniqueId::new(),
            config,
        });
        Self::init_listeners(&this);
        this
    }

    fn init_listeners(this: &Arc<Self>) {
        unsafe { this.self_weak.replace(Arc::downgrade(this)) };

        let msg_notifier = &this.peer.channel.msg_notifier;
        msg_notifier.inv.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, vectors: Vec<InvVector>| this.on_inv(vectors),
        ));
        msg_notifier.block.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, block| this.on_block(block),
        ));
        msg_notifier.header.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, header| this.on_header(header),
        ));
        msg_notifier.tx.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, msg| this.on_tx(msg),
        ));
        msg_notifier
            .not_found
            .write()
            .register(weak_passthru_listener(
                Arc::downgrade(this),
                |this, vectors: Vec<InvVector>| this.on_not_found(vectors),
            ));
        msg_notifier
            .get_data
            .write()
            .register(weak_passthru_listener(
                Arc::downgrade(this),
                |this, vectors: Vec<InvVector>| this.on_get_data(vectors),
            ));
        msg_notifier
            .get_header
            .write()
            .register(weak_passthru_listener(
                Arc::downgrade(this),
                |this, vectors: Vec<InvVector>| this.on_get_header(vectors),
            ));
        msg_notifier.mempool.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, _: ()| this.on_mempool(),
        ));
        msg_notifier
            .subscribe
            .write()
            .register(weak_passthru_listener(
                Arc::downgrade(this),
                |this, subscription: Subscription| this.on_subscribe(subscription),
            ));
        msg_notifier.get_head.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, _: ()| this.on_get_head(),
        ));
        msg_notifier.head.write().register(weak_passthru_listener(
            Arc::downgrade(this),
            |this, header: BlockHeader| this.on_head(header),
        ));
        msg_notifier
            .block_proof
            .write()
            .register(weak_passthru_listener(Arc::downgrade(this), |this, msg| {
                this.on_block_proof(msg)
            }));
        msg_notifier
            .transactions_proof
            .write()
            .register(weak_passthru_listener(Arc::downgrade(this), |this, msg| {
                this.on_transactions_proof(msg)
            }));
        msg_notifier
            .transaction_receipts
            .write()
            .register(weak_passthru_listener(Arc::downgrade(this), |this, msg| {
                this.on_transaction_receipts(msg)
            }));

        this.peer
            .channel
            .close_notifier
            .write()
            .register(weak_listener(Arc::downgrade(this), |this, _ty| {
                this.on_close()
            }));

        // Relay flush timers.
        let weak = Arc::downgrade(this);
        this.timers.set_interval(
            ConsensusAgentTimer::TxInvVectors,
            move || {
                let this = upgrade_weak!(weak);
                this.send_waiting_tx_inv_vectors();
            },
            this.config.transaction_relay_interval,
        );
        let weak = Arc::downgrade(this);
        this.timers.set_interval(
            ConsensusAgentTimer::FreeTxInvVectors,
            move || {
                let this = upgrade_weak!(weak);
                this.send_waiting_free_tx_inv_vectors();
            },
            this.config.free_transaction_relay_interval,
        );

        // Learn the peer's head right away.
        this.request_head();
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn synced(&self) -> bool {
        self.state.read().synced
    }

    /// Called by the owning node once initial sync with this peer completed;
    /// enables block relay.
    pub fn mark_synced(&self) {
        self.state.write().synced = true;
    }

    /// Updates the local subscription and announces it to the peer.
    pub fn subscribe(&self, subscription: Subscription) {
        {
            let mut state = self.state.write();
            state.target_subscription = subscription.clone();
            state.local_subscription = subscription.clone();
            state.last_subscription_change = Instant::now();
        }
        self.peer
            .channel
            .send_or_close(Message::Subscribe(Box::new(subscription)));
    }

    fn on_subscribe(&self, subscription: Subscription) {
        self.state.write().remote_subscription = subscription;
    }

    pub fn local_subscription(&self) -> Subscription {
        self.state.read().local_subscription.clone()
    }

    pub fn target_subscription(&self) -> Subscription {
        self.state.read().target_subscription.clone()
    }

    pub fn remote_subscription(&self) -> Subscription {
        self.state.read().remote_subscription.clone()
    }

    fn request_head(&self) {
        self.peer.channel.send_or_close(Message::GetHead);
    }

    fn on_head(&self, header: BlockHeader) {
        self.peer.set_head(header);
        self.schedule_head_request();
    }

    pub(crate) fn schedule_head_request(&self) {
        let weak = self.self_weak.clone();
        self.timers.set_delay(
            ConsensusAgentTimer::GetHead,
            move || {
                let this = upgrade_weak!(weak);
                this.request_head();
            },
            self.config.head_request_interval,
        );
    }

    fn on_get_head(&self) {
        let head = self.policy.get_head();
        self.peer.channel.send_or_close(Message::Head(Box::new(head)));
    }

    /// Channel close handler: publish the close event, then tear down.
    fn on_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notifier.read().notify(ConsensusAgentEvent::Close);
        self.teardown();
    }

    /// Explicit teardown; also closes the underlying channel. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.teardown();
        self.peer.channel.close(network::CloseType::Regular);
        self.notifier.read().notify(ConsensusAgentEvent::Close);
    }

    /// Cancels queued synchronizer tasks, all timers and queues, and fails
    /// every pending waiter. Message listeners stay registered; they hold
    /// weak references and the closed channel no longer dispatches.
    fn teardown(&self) {
        self.synchronizer.clear();
        self.timers.clear_all();
        let (pending_requests, block_proof, transactions_proof, transaction_receipts) = {
            let mut state = self.state.write();
            state.txs_to_request.stop();
            state.waiting_tx_inv_vectors.stop();
            state.waiting_free_tx_inv_vectors.stop();
            (
                std::mem::take(&mut state.pending_requests),
                state.block_proof_request.take(),
                state.transactions_proof_request.take(),
                state.transaction_receipts_request.take(),
            )
        };
        // Dropped outside the state lock: waiters observe cancellation and
        // proof guards release their synchronizer keys.
        drop(pending_requests);
        drop(block_proof);
        drop(transactions_proof);
        drop(transaction_receipts);
    }

    pub(crate) fn as_requester(&self) -> Option<Arc<dyn VectorRequester>> {
        self.self_weak
            .upgrade()
            .map(|arc| arc as Arc<dyn VectorRequester>)
    }
}

impl<P: ConsensusPolicy> VectorRequester for ConsensusAgent<P> {
    fn requester_id(&self) -> UniqueId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.peer.channel.closed()
    }

    fn request_vector(&self, vector: InvVector) {
        self.queue_vector(vector);
    }
}
