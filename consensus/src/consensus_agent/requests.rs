use std::future::Future;

use futures::channel::oneshot;

use hash::Blake2bHash;
use network::CloseType;
use network_messages::{InvVector, InvVectorType, Message, TxMessage};
use primitives::block::{Block, BlockHeader};
use primitives::transaction::Transaction;

use crate::error::RequestError;
use crate::policy::ConsensusPolicy;

use super::{ConsensusAgent, ConsensusAgentTimer};

/// Payload delivered to direct-request waiters.
pub(crate) enum RequestedObject {
    Block(Box<Block>),
    Transaction(Box<Transaction>),
}

impl<P: ConsensusPolicy> ConsensusAgent<P> {
    /// Requests a single block from the peer. Resolves with the block or
    /// fails with `Timeout`/`NotFound`.
    pub fn request_block(
        &self,
        hash: Blake2bHash,
    ) -> impl Future<Output = Result<Block, RequestError>> {
        let rx = self.register_object_request(InvVector::from_block_hash(hash));
        async move {
            match rx.await {
                Ok(Ok(RequestedObject::Block(block))) => Ok(*block),
                Ok(Ok(RequestedObject::Transaction(_))) => Err(RequestError::Closed),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(RequestError::Closed),
            }
        }
    }

    /// Requests a single transaction from the peer.
    pub fn request_transaction(
        &self,
        hash: Blake2bHash,
    ) -> impl Future<Output = Result<Transaction, RequestError>> {
        let rx = self.register_object_request(InvVector::from_tx_hash(hash));
        async move {
            match rx.await {
                Ok(Ok(RequestedObject::Transaction(transaction))) => Ok(*transaction),
                Ok(Ok(RequestedObject::Block(_))) => Err(RequestError::Closed),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(RequestError::Closed),
            }
        }
    }

    fn register_object_request(
        &self,
        vector: InvVector,
    ) -> oneshot::Receiver<Result<RequestedObject, RequestError>> {
        let (tx, rx) = oneshot::channel();
        if self.peer.channel.closed() {
            // Dropping the sender fails the waiter with `Closed`.
            return rx;
        }

        {
            let mut state = self.state.write();
            if let Some(waiters) = state.pending_requests.get_mut(&vector) {
                // Already requested; just wait for the same response.
                waiters.push(tx);
                return rx;
            }
            state.pending_requests.insert(vector.clone(), vec![tx]);
            // Transactions enter the in-flight set so their delivery passes
            // the unsolicited check; blocks resolve via the pending table.
            if vector.ty == InvVectorType::Transaction {
                state.objects_in_flight.insert(vector.clone());
            }
        }

        let weak = self.self_weak.clone();
        let timeout_vector = vector.clone();
        self.timers.set_delay(
            ConsensusAgentTimer::Request(vector.clone()),
            move || {
                let this = upgrade_weak!(weak);
                this.on_request_timeout(&timeout_vector);
            },
            self.config.request_timeout,
        );

        self.peer.channel.send_or_close(Message::GetData(vec![vector]));
        rx
    }

    fn on_request_timeout(&self, vector: &InvVector) {
        let waiters = { self.state.write().pending_requests.remove(vector) };
        if let Some(waiters) = waiters {
            warn!("Direct request for {} to {} timed out", vector, self.peer);
            for waiter in waiters {
                let _ = waiter.send(Err(RequestError::Timeout));
            }
        }
    }

    pub(super) fn on_block(&self, mut block: Block) {
        let hash = block.hash();
        trace!(
            "[BLOCK] #{} ({} txs) from {}",
            block.height(),
            block.transactions().map(|txs| txs.len()).unwrap_or(0),
            self.peer
        );
        let vector = InvVector::from_block_hash(hash.clone());

        // Directly requested blocks resolve their waiters and skip the batch
        // bookkeeping entirely.
        let waiters = { self.state.write().pending_requests.remove(&vector) };
        if let Some(waiters) = waiters {
            self.timers.clear_delay(&ConsensusAgentTimer::Request(vector));
            for waiter in waiters {
                let _ = waiter.send(Ok(RequestedObject::Block(Box::new(block.clone()))));
            }
            return;
        }

        {
            let state = self.state.read();
            if !state.objects_in_flight.contains(&vector)
                && !state.objects_that_flew.contains(&vector)
            {
                warn!("Unsolicited block from {} - discarding", self.peer);
                return;
            }
        }

        // Swap in transactions the mempool already verified.
        if let Some(transactions) = block.transactions_mut() {
            for transaction in transactions.iter_mut() {
                if let Some(mempool_tx) = self.policy.get_transaction(&transaction.hash()) {
                    *transaction = mempool_tx;
                }
            }
        }

        self.track_peer_head(&hash, block.height(), &block.header);

        self.on_object_received(&vector);

        self.state.write().objects_processing.insert(vector.clone());
        self.policy.process_block(&hash, block);
        self.on_object_processed(&vector);

        self.inv_mgr.note_vector_received(&vector);
    }

    pub(super) fn on_header(&self, header: BlockHeader) {
        let hash = header.hash();
        trace!("[HEADER] #{} {} from {}", header.height, hash, self.peer);
        let vector = InvVector::from_block_hash(hash.clone());

        {
            let state = self.state.read();
            if !state.objects_in_flight.contains(&vector)
                && !state.objects_that_flew.contains(&vector)
            {
                warn!("Unsolicited header from {} - discarding", self.peer);
                return;
            }
        }

        self.track_peer_head(&hash, header.height, &header);

        self.on_object_received(&vector);

        self.state.write().objects_processing.insert(vector.clone());
        self.policy.process_header(&hash, header);
        self.on_object_processed(&vector);

        self.inv_mgr.note_vector_received(&vector);
    }

    pub(super) fn on_tx(&self, msg: TxMessage) {
        let transaction = msg.transaction;
        let hash = transaction.hash();
        trace!(
            "[TX] {} from {} value {} fee {}",
            hash,
            self.peer,
            transaction.value,
            transaction.fee
        );
        let vector = InvVector::from_tx_hash(hash.clone());

        {
            let state = self.state.read();
            if !state.objects_in_flight.contains(&vector)
                && !state.objects_that_flew.contains(&vector)
            {
                warn!("Unsolicited transaction from {} - discarding", self.peer);
                return;
            }
        }

        self.inv_mgr.note_vector_received(&vector);

        self.on_object_received(&vector);

        let (matches, grace_expired) = {
            let mut state = self.state.write();
            state.objects_processing.insert(vector.clone());
            (
                state.local_subscription.matches_transaction(&transaction),
                state.last_subscription_change.elapsed()
                    > self.config.subscription_change_grace_period,
            )
        };

        if matches {
            self.policy.process_transaction(&hash, transaction.clone());
        }

        // Resolve a direct request for this transaction.
        let waiters = { self.state.write().pending_requests.remove(&vector) };
        if let Some(waiters) = waiters {
            self.timers
                .clear_delay(&ConsensusAgentTimer::Request(vector.clone()));
            for waiter in waiters {
                let _ = waiter.send(Ok(RequestedObject::Transaction(Box::new(
                    transaction.clone(),
                ))));
            }
        }

        // A peer may keep sending non-matching transactions for a short
        // while after a subscription change; past that it is a violation.
        if !matches && grace_expired {
            warn!(
                "Transaction from {} does not match our subscription - discarding and closing the channel",
                self.peer
            );
            self.peer
                .channel
                .close(CloseType::ReceivedTransactionNotMatchingOurSubscription);
        }

        self.on_object_processed(&vector);
    }

    pub(super) fn on_not_found(&self, vectors: Vec<InvVector>) {
        trace!("[NOTFOUND] {} vectors from {}", vectors.len(), self.peer);
        for vector in vectors {
            let waiters = { self.state.write().pending_requests.remove(&vector) };
            if let Some(waiters) = waiters {
                self.timers
                    .clear_delay(&ConsensusAgentTimer::Request(vector.clone()));
                for waiter in waiters {
                    let _ = waiter.send(Err(RequestError::NotFound));
                }
            }

            let in_flight = self.state.read().objects_in_flight.contains(&vector);
            if in_flight {
                if let Some(agent) = self.as_requester() {
                    self.inv_mgr.note_vector_not_received(&agent, &vector);
                }
                self.on_object_received(&vector);
            }
        }
    }

    fn track_peer_head(&self, hash: &Blake2bHash, height: u32, header: &BlockHeader) {
        let is_new_head = match self.peer.head() {
            None => &self.peer.head_hash == hash,
            Some(head) => height > head.height,
        };
        if is_new_head {
            self.peer.set_head(header.clone());
            self.schedule_head_request();
        }
    }
}
