use network::CloseType;
use network_messages::{InvVector, InvVectorType, Message, TxMessage};
use network_primitives::Subscription;
use primitives::block::Block;
use primitives::transaction::Transaction;

use crate::policy::ConsensusPolicy;

use super::{ConsensusAgent, ConsensusAgentEvent, ConsensusAgentState, ConsensusAgentTimer};
use super::SYNC_ON_INV;

/// An inv vector queued for free-transaction relay, together with the
/// serialized size of its transaction. Hash and equality ignore the size so
/// the vector stays interchangeable in key-based removals.
#[derive(Clone, Debug)]
pub(crate) struct FreeTransactionVector {
    vector: InvVector,
    pub(crate) serialized_size: usize,
}

impl FreeTransactionVector {
    pub(crate) fn from_vector(vector: &InvVector, serialized_size: usize) -> Self {
        FreeTransactionVector {
            vector: vector.clone(),
            serialized_size,
        }
    }
}

impl PartialEq for FreeTransactionVector {
    fn eq(&self, other: &FreeTransactionVector) -> bool {
        self.vector == other.vector
    }
}

impl Eq for FreeTransactionVector {}

impl std::hash::Hash for FreeTransactionVector {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(&self.vector, state);
    }
}

impl From<FreeTransactionVector> for InvVector {
    fn from(vector: FreeTransactionVector) -> Self {
        vector.vector
    }
}

impl<P: ConsensusPolicy> ConsensusAgent<P> {
    /// Inv ingress. Serialized through the synchronizer so concurrent inv
    /// messages are handled in arrival order.
    pub(super) fn on_inv(&self, vectors: Vec<InvVector>) {
        let weak = self.self_weak.clone();
        let _ = self.synchronizer.push(SYNC_ON_INV, move |_guard| {
            let this = upgrade_weak!(weak);
            this.process_inv(vectors);
        });
    }

    fn process_inv(&self, vectors: Vec<InvVector>) {
        let num_vectors = vectors.len();

        // The peer knows these objects now; drop them from the relay queues.
        let mut state = self.state.write();
        for vector in vectors.iter() {
            state.known_objects.insert(vector.clone());
            state.waiting_tx_inv_vectors.remove(vector);
            // Serialized size does not matter here, Hash and Eq ignore it.
            state
                .waiting_free_tx_inv_vectors
                .remove(&FreeTransactionVector::from_vector(vector, 0));
        }

        let vectors: Vec<InvVector> = vectors
            .into_iter()
            .filter(|vector| {
                !state.objects_in_flight.contains(vector)
                    && !state.objects_processing.contains(vector)
                    && self.policy.should_request_data(vector)
            })
            .collect();
        drop(state);

        // Check the advertised objects against the local chain and mempool.
        let mut unknown_blocks = Vec::new();
        let mut unknown_txs = Vec::new();
        for vector in vectors {
            match vector.ty {
                InvVectorType::Block => {
                    if self.policy.get_block(&vector.hash, true, false).is_none() {
                        self.notifier
                            .read()
                            .notify(ConsensusAgentEvent::NewBlockAnnounced(vector.hash.clone()));
                        unknown_blocks.push(vector);
                    } else {
                        self.notifier
                            .read()
                            .notify(ConsensusAgentEvent::KnownBlockAnnounced(vector.hash.clone()));
                    }
                }
                InvVectorType::Transaction => {
                    if self.policy.get_transaction(&vector.hash).is_none() {
                        self.notifier.read().notify(
                            ConsensusAgentEvent::NewTransactionAnnounced(vector.hash.clone()),
                        );
                        unknown_txs.push(vector);
                    } else {
                        self.notifier.read().notify(
                            ConsensusAgentEvent::KnownTransactionAnnounced(vector.hash.clone()),
                        );
                    }
                }
            }
        }

        trace!(
            "[INV] {} vectors, {} new blocks, {} new txs from {}",
            num_vectors,
            unknown_blocks.len(),
            unknown_txs.len(),
            self.peer
        );

        if unknown_blocks.is_empty() && unknown_txs.is_empty() {
            self.notifier.read().notify(ConsensusAgentEvent::NoUnknownObjects);
            return;
        }

        if let Some(agent) = self.as_requester() {
            for vector in unknown_blocks.into_iter().chain(unknown_txs) {
                self.inv_mgr.ask_to_request_vector(&agent, &vector);
            }
        }
    }

    /// Coordinator callback: queue `vector` for the next `get-data` batch.
    pub(crate) fn queue_vector(&self, vector: InvVector) {
        let to_send = {
            let mut state = self.state.write();
            match vector.ty {
                InvVectorType::Block => {
                    state.blocks_to_request.enqueue(vector);
                }
                InvVectorType::Transaction => {
                    state.txs_to_request.enqueue(vector);
                }
            }
            self.request_vectors_throttled(&mut state)
        };
        if let Some((blocks, txs)) = to_send {
            self.do_request_data(blocks, txs);
        }
    }

    /// Issues the batch right away once enough vectors piled up, otherwise
    /// re-arms the collection window.
    fn request_vectors_throttled(
        &self,
        state: &mut ConsensusAgentState,
    ) -> Option<(Vec<InvVector>, Vec<InvVector>)> {
        self.timers.clear_delay(&ConsensusAgentTimer::GetDataThrottle);

        if state.blocks_to_request.len() + state.txs_to_request.num_available()
            >= self.config.request_threshold
        {
            self.prepare_request_data(state)
        } else {
            let weak = self.self_weak.clone();
            self.timers.set_delay(
                ConsensusAgentTimer::GetDataThrottle,
                move || {
                    let this = upgrade_weak!(weak);
                    let to_send = {
                        let mut state = this.state.write();
                        this.prepare_request_data(&mut state)
                    };
                    if let Some((blocks, txs)) = to_send {
                        this.do_request_data(blocks, txs);
                    }
                },
                self.config.request_throttle,
            );
            None
        }
    }

    /// Moves the next batch into `objects_in_flight` and arms the batch
    /// timeout. The caller sends the returned vectors after releasing the
    /// state lock.
    fn prepare_request_data(
        &self,
        state: &mut ConsensusAgentState,
    ) -> Option<(Vec<InvVector>, Vec<InvVector>)> {
        // Only one batch at a time.
        if !state.objects_in_flight.is_empty() {
            return None;
        }
        if state.blocks_to_request.is_empty() && !state.txs_to_request.check_available() {
            return None;
        }

        // Blocks first, transactions fill the rest of the batch.
        let num_blocks = state.blocks_to_request.len().min(self.config.request_vectors_max);
        let num_txs = self.config.request_vectors_max - num_blocks;

        let block_vectors = state.blocks_to_request.dequeue_multi(num_blocks);
        let tx_vectors = state.txs_to_request.dequeue_multi(num_txs);
        for vector in block_vectors.iter().chain(tx_vectors.iter()) {
            state.objects_in_flight.insert(vector.clone());
        }

        let weak = self.self_weak.clone();
        self.timers.set_delay(
            ConsensusAgentTimer::GetData,
            move || {
                let this = upgrade_weak!(weak);
                this.no_more_data();
            },
            self.config.request_timeout,
        );

        Some((block_vectors, tx_vectors))
    }

    fn do_request_data(&self, block_vectors: Vec<InvVector>, tx_vectors: Vec<InvVector>) {
        if self.policy.will_request_headers() {
            if !block_vectors.is_empty() {
                self.peer.channel.send_or_close(Message::GetHeader(block_vectors));
            }
            if !tx_vectors.is_empty() {
                self.peer.channel.send_or_close(Message::GetData(tx_vectors));
            }
        } else {
            let mut vectors = block_vectors;
            vectors.extend(tx_vectors);
            self.peer.channel.send_or_close(Message::GetData(vectors));
        }
    }

    /// Batch accounting for a delivered or explicitly missing object.
    pub(super) fn on_object_received(&self, vector: &InvVector) {
        let mut state = self.state.write();
        if state.objects_in_flight.is_empty() {
            return;
        }
        state.objects_in_flight.remove(vector);

        if !state.objects_in_flight.is_empty() {
            // More objects of this batch are outstanding; restart the window.
            let weak = self.self_weak.clone();
            self.timers.reset_delay(
                ConsensusAgentTimer::GetData,
                move || {
                    let this = upgrade_weak!(weak);
                    this.no_more_data();
                },
                self.config.request_timeout,
            );
        } else {
            drop(state);
            self.no_more_data();
        }
    }

    /// Closes the current batch: everything still in flight flew, queued work
    /// starts the next batch.
    pub(super) fn no_more_data(&self) {
        self.timers.clear_delay(&ConsensusAgentTimer::GetData);

        let (not_received, to_send) = {
            let mut state = self.state.write();
            let not_received: Vec<InvVector> = state.objects_in_flight.drain().collect();
            for vector in not_received.iter() {
                state.objects_that_flew.insert(vector.clone());
            }
            let to_send =
                if !state.blocks_to_request.is_empty() || state.txs_to_request.check_available() {
                    self.prepare_request_data(&mut state)
                } else {
                    None
                };
            (not_received, to_send)
        };

        if !not_received.is_empty() {
            if let Some(agent) = self.as_requester() {
                for vector in not_received.iter() {
                    self.inv_mgr.note_vector_not_received(&agent, vector);
                }
            }
        }

        match to_send {
            Some((blocks, txs)) => self.do_request_data(blocks, txs),
            None => self.notifier.read().notify(ConsensusAgentEvent::AllObjectsReceived),
        }
    }

    pub(super) fn on_object_processed(&self, vector: &InvVector) {
        let mut state = self.state.write();
        state.objects_processing.remove(vector);
        if state.objects_processing.is_empty() {
            drop(state);
            self.notifier.read().notify(ConsensusAgentEvent::AllObjectsProcessed);
        }
    }

    /// Serves a `get-data` request from the local chain and mempool.
    pub(super) fn on_get_data(&self, vectors: Vec<InvVector>) {
        // The peer obviously knows what it asks for.
        {
            let mut state = self.state.write();
            for vector in vectors.iter() {
                state.known_objects.insert(vector.clone());
            }
        }

        let mut unknown_objects = Vec::new();
        for vector in vectors {
            match vector.ty {
                InvVectorType::Block => match self.policy.get_raw_block(&vector.hash, false) {
                    Some(block) => {
                        if self.peer.channel.send(Message::Block(Box::new(block))).is_err() {
                            self.peer.channel.close(CloseType::SendFailed);
                            return;
                        }
                    }
                    None => unknown_objects.push(vector),
                },
                InvVectorType::Transaction => match self.policy.get_transaction(&vector.hash) {
                    Some(transaction) => {
                        if self.peer.channel.send(TxMessage::new(transaction)).is_err() {
                            self.peer.channel.close(CloseType::SendFailed);
                            return;
                        }
                    }
                    None => unknown_objects.push(vector),
                },
            }
        }

        if !unknown_objects.is_empty() {
            self.peer.channel.send_or_close(Message::NotFound(unknown_objects));
        }
    }

    /// Serves a `get-header` request.
    pub(super) fn on_get_header(&self, vectors: Vec<InvVector>) {
        {
            let mut state = self.state.write();
            for vector in vectors.iter() {
                state.known_objects.insert(vector.clone());
            }
        }

        let mut unknown_objects = Vec::new();
        for vector in vectors {
            match vector.ty {
                InvVectorType::Block => match self.policy.get_block(&vector.hash, false, false) {
                    Some(block) => {
                        let header = Message::Header(Box::new(block.header));
                        if self.peer.channel.send(header).is_err() {
                            self.peer.channel.close(CloseType::SendFailed);
                            return;
                        }
                    }
                    None => unknown_objects.push(vector),
                },
                // There are no headers for transactions.
                InvVectorType::Transaction => {}
            }
        }

        if !unknown_objects.is_empty() {
            self.peer.channel.send_or_close(Message::NotFound(unknown_objects));
        }
    }

    /// Serves an inbound `mempool` request with inv batches of the
    /// subscribed mempool transactions.
    pub(super) fn on_mempool(&self) {
        trace!("[MEMPOOL] from {}", self.peer);
        {
            let mut state = self.state.write();
            if !state.mempool_limit.note_single() {
                warn!("Rejecting mempool message from {} - rate limit exceeded", self.peer);
                return;
            }
        }

        let subscription = self.state.read().remote_subscription.clone();
        if subscription == Subscription::None {
            return;
        }
        let transactions = self
            .policy
            .get_subscribed_mempool_transactions(&subscription, self.config.mempool_entries_max);

        let mut vectors: Vec<InvVector> = transactions
            .iter()
            .map(|tx| InvVector::from_tx_hash(tx.hash()))
            .collect();

        // Split into multiple inv messages if the mempool is large.
        while !vectors.is_empty() {
            let count = vectors.len().min(InvVector::VECTORS_MAX_COUNT);
            let batch: Vec<InvVector> = vectors.drain(..count).collect();
            self.peer.channel.send_or_close(Message::Inv(batch));

            if count == InvVector::VECTORS_MAX_COUNT && !vectors.is_empty() {
                std::thread::sleep(self.policy.mempool_throttle());
            }
        }
    }

    /// Announces a block to the peer, piggybacking waiting transaction
    /// vectors onto the same inv.
    pub fn relay_block(&self, block: &Block) -> bool {
        let vector = InvVector::from_block_hash(block.hash());
        let vectors = {
            let state = self.state.read();
            // Relay only once synced, matching the subscription, and only new objects.
            if !state.synced
                || !state.remote_subscription.matches_block(block)
                || state.known_objects.contains(&vector)
            {
                return false;
            }
            drop(state);

            let mut state = self.state.write();
            let mut vectors = state
                .waiting_tx_inv_vectors
                .dequeue_multi(InvVector::VECTORS_MAX_COUNT - 1);
            vectors.insert(0, vector.clone());
            vectors
        };

        self.peer.channel.send_or_close(Message::Inv(vectors));
        self.mark_known_after_delay(vector);
        true
    }

    /// Queues a transaction announcement, classifying it as free or paid.
    pub fn relay_transaction(&self, transaction: &Transaction) -> bool {
        let vector = InvVector::from_tx_hash(transaction.hash());
        {
            let state = self.state.read();
            if !state.remote_subscription.matches_transaction(transaction)
                || state.known_objects.contains(&vector)
            {
                return false;
            }
        }

        {
            let mut state = self.state.write();
            if transaction.fee_per_byte() < self.config.transaction_relay_fee_min as f64 {
                state.waiting_free_tx_inv_vectors.enqueue(
                    FreeTransactionVector::from_vector(&vector, transaction.serialized_size()),
                );
            } else {
                state.waiting_tx_inv_vectors.enqueue(vector.clone());
            }
        }

        self.mark_known_after_delay(vector);
        true
    }

    /// Drops a transaction from both relay queues, e.g. after it got mined.
    pub fn remove_transaction(&self, transaction: &Transaction) {
        let vector = InvVector::from_tx_hash(transaction.hash());
        let mut state = self.state.write();
        state.waiting_tx_inv_vectors.remove(&vector);
        // Serialized size does not matter here, Hash and Eq ignore it.
        state
            .waiting_free_tx_inv_vectors
            .remove(&FreeTransactionVector::from_vector(&vector, 0));
    }

    /// Assume the peer knows a relayed object a short while after the inv.
    fn mark_known_after_delay(&self, vector: InvVector) {
        let weak = self.self_weak.clone();
        let v = vector.clone();
        self.timers.set_delay(
            ConsensusAgentTimer::KnowsObject(vector),
            move || {
                let this = upgrade_weak!(weak);
                this.state.write().known_objects.insert(v);
            },
            self.config.knows_object_after_inv_delay,
        );
    }

    pub(super) fn send_waiting_tx_inv_vectors(&self) {
        let vectors = {
            self.state
                .write()
                .waiting_tx_inv_vectors
                .dequeue_multi(InvVector::VECTORS_MAX_COUNT)
        };
        if !vectors.is_empty() {
            let num_vectors = vectors.len();
            self.peer.channel.send_or_close(Message::Inv(vectors));
            debug!("Sent {} tx inv vectors to {}", num_vectors, self.peer);
        }
    }

    pub(super) fn send_waiting_free_tx_inv_vectors(&self) {
        let vectors = {
            let mut state = self.state.write();
            let mut vectors = Vec::new();
            let mut size = 0;
            while vectors.len() < InvVector::VECTORS_MAX_COUNT
                && size < self.config.free_transaction_size_per_interval
                && state.waiting_free_tx_inv_vectors.check_available()
            {
                match state.waiting_free_tx_inv_vectors.dequeue() {
                    Some(free_vector) => {
                        size += free_vector.serialized_size;
                        vectors.push(InvVector::from(free_vector));
                    }
                    None => break,
                }
            }
            vectors
        };
        if !vectors.is_empty() {
            let num_vectors = vectors.len();
            self.peer.channel.send_or_close(Message::Inv(vectors));
            debug!("Sent {} free tx inv vectors to {}", num_vectors, self.peer);
        }
    }
}
