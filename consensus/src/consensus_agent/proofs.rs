use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::channel::oneshot;

use hash::Blake2bHash;
use network::{CloseType, Peer};
use network_messages::{
    BlockProofMessage, GetBlockProofAtMessage, GetBlockProofMessage,
    GetTransactionReceiptsByAddressMessage, GetTransactionReceiptsByHashesMessage,
    GetTransactionsProofByAddressesMessage, GetTransactionsProofByHashesMessage, Message,
    MessageType, TransactionReceiptsMessage, TransactionsProofMessage,
};
use primitives::block::Block;
use primitives::transaction::{Transaction, TransactionReceipt};
use primitives::Address;
use utils::synchronizer::SynchronizerGuard;

use crate::error::ProofError;
use crate::policy::ConsensusPolicy;

use super::{
    ConsensusAgent, SYNC_GET_BLOCK_PROOF, SYNC_GET_TRANSACTIONS_PROOF,
    SYNC_GET_TRANSACTION_RECEIPTS,
};

/// Which block a proof was requested for.
#[derive(Clone, Debug)]
pub(crate) enum BlockProofTarget {
    Hash(Blake2bHash),
    Height(u32),
}

pub(crate) struct BlockProofRequest {
    target: BlockProofTarget,
    known_block: Block,
    resolver: oneshot::Sender<Result<Block, ProofError>>,
    _guard: SynchronizerGuard,
}

pub(crate) struct TransactionsProofRequest {
    block: Block,
    addresses: Vec<Address>,
    hashes: Vec<Blake2bHash>,
    resolver: oneshot::Sender<Result<Vec<Transaction>, ProofError>>,
    _guard: SynchronizerGuard,
}

pub(crate) struct TransactionReceiptsRequest {
    address: Option<Address>,
    hashes: Option<Vec<Blake2bHash>>,
    resolver: oneshot::Sender<Result<Vec<TransactionReceipt>, ProofError>>,
    _guard: SynchronizerGuard,
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn flatten<T>(
    rx: Option<oneshot::Receiver<Result<T, ProofError>>>,
) -> impl Future<Output = Result<T, ProofError>> {
    async move {
        match rx {
            None => Err(ProofError::Unsupported),
            Some(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(ProofError::Closed),
            },
        }
    }
}

impl<P: ConsensusPolicy> ConsensusAgent<P> {
    /// Requests an interlink proof that the block with `block_hash_to_prove`
    /// is an ancestor of `known_block`. Resolves with the proven block.
    pub fn request_block_proof(
        &self,
        block_hash_to_prove: Blake2bHash,
        known_block: Block,
    ) -> impl Future<Output = Result<Block, ProofError>> {
        let msg = Message::GetBlockProof(Box::new(GetBlockProofMessage {
            block_hash_to_prove: block_hash_to_prove.clone(),
            known_block_hash: known_block.hash(),
        }));
        let rx = self.push_block_proof_request(
            BlockProofTarget::Hash(block_hash_to_prove),
            known_block,
            msg,
        );
        flatten(Some(rx))
    }

    /// Height-addressed variant of `request_block_proof`. Requires a v2 peer.
    pub fn request_block_proof_at(
        &self,
        block_height_to_prove: u32,
        known_block: Block,
    ) -> impl Future<Output = Result<Block, ProofError>> {
        if self.peer.version < Peer::VERSION_PROOFS_BY_HASH {
            return flatten(None);
        }
        let msg = Message::GetBlockProofAt(Box::new(GetBlockProofAtMessage {
            block_height_to_prove,
            known_block_hash: known_block.hash(),
        }));
        let rx = self.push_block_proof_request(
            BlockProofTarget::Height(block_height_to_prove),
            known_block,
            msg,
        );
        flatten(Some(rx))
    }

    fn push_block_proof_request(
        &self,
        target: BlockProofTarget,
        known_block: Block,
        msg: Message,
    ) -> oneshot::Receiver<Result<Block, ProofError>> {
        let (tx, rx) = oneshot::channel();
        let weak = self.self_weak.clone();
        let timeout = self.config.block_proof_request_timeout;
        let _ = self.synchronizer.push(SYNC_GET_BLOCK_PROOF, move |guard| {
            let this = match weak.upgrade() {
                Some(this) => this,
                None => return,
            };
            if this.peer.channel.closed() {
                return;
            }
            {
                let mut state = this.state.write();
                debug_assert!(
                    state.block_proof_request.is_none(),
                    "block proof slot taken behind the synchronizer gate"
                );
                state.block_proof_request = Some(BlockProofRequest {
                    target,
                    known_block,
                    resolver: tx,
                    _guard: guard,
                });
            }
            this.peer.channel.send_or_close(msg);
            let weak = this.self_weak.clone();
            this.peer.channel.expect_message(
                MessageType::BlockProof,
                move || {
                    let this = upgrade_weak!(weak);
                    this.on_block_proof_timeout();
                },
                timeout,
            );
        });
        rx
    }

    fn on_block_proof_timeout(&self) {
        let pending = { self.state.write().block_proof_request.take() };
        if let Some(pending) = pending {
            warn!("Block proof request to {} timed out", self.peer);
            let _ = pending.resolver.send(Err(ProofError::Timeout));
        }
    }

    pub(super) fn on_block_proof(&self, msg: BlockProofMessage) {
        let pending = { self.state.write().block_proof_request.take() };
        let pending = match pending {
            Some(pending) => pending,
            None => {
                warn!("Unsolicited block proof from {} - discarding", self.peer);
                return;
            }
        };
        let result = self.check_block_proof(&pending, msg);
        let _ = pending.resolver.send(result);
    }

    fn check_block_proof(
        &self,
        pending: &BlockProofRequest,
        msg: BlockProofMessage,
    ) -> Result<Block, ProofError> {
        let proof = match msg.proof {
            Some(proof) if !proof.is_empty() => proof,
            _ => {
                debug!("Peer {} did not provide the requested block proof", self.peer);
                return Err(ProofError::Rejected);
            }
        };
        let tail = match proof.tail() {
            Some(tail) => tail,
            None => return Err(ProofError::Rejected),
        };
        let head = match proof.head() {
            Some(head) => head,
            None => return Err(ProofError::Rejected),
        };

        match &pending.target {
            BlockProofTarget::Hash(hash) => {
                if &tail.hash() != hash {
                    debug!("Block proof from {} does not prove the requested block", self.peer);
                    return Err(ProofError::Invalid("proof tail is not the requested block"));
                }
            }
            BlockProofTarget::Height(height) => {
                if tail.height() != *height {
                    debug!("Block proof from {} does not prove the requested height", self.peer);
                    return Err(ProofError::Invalid("proof tail is not at the requested height"));
                }
            }
        }

        if !pending.known_block.is_interlink_successor_of(head) {
            debug!("Block proof from {} does not connect to our known block", self.peer);
            return Err(ProofError::Invalid("known block does not succeed the proof head"));
        }

        if !proof.verify() {
            warn!("Invalid block proof from {} - discarding and closing the channel", self.peer);
            self.peer.channel.close(CloseType::InvalidBlockProof);
            return Err(ProofError::Invalid("proof chain does not verify"));
        }

        let now = unix_time();
        for block in proof.blocks.iter() {
            if !block.verify(now) {
                warn!(
                    "Invalid block #{} in block proof from {} - discarding and closing the channel",
                    block.height(),
                    self.peer
                );
                self.peer.channel.close(CloseType::InvalidBlockProof);
                return Err(ProofError::Invalid("block in proof does not verify"));
            }
        }

        Ok(tail.clone())
    }

    /// Requests a merkle proof for the transactions of `block` touching any
    /// of `addresses`. Resolves with the proven transactions.
    pub fn request_transactions_proof_by_addresses(
        &self,
        addresses: Vec<Address>,
        block: Block,
    ) -> impl Future<Output = Result<Vec<Transaction>, ProofError>> {
        let msg = Message::GetTransactionsProofByAddresses(Box::new(
            GetTransactionsProofByAddressesMessage {
                block_hash: block.hash(),
                addresses: addresses.clone(),
            },
        ));
        let rx = self.push_transactions_proof_request(block, addresses, Vec::new(), msg);
        flatten(Some(rx))
    }

    /// Hash-addressed variant. Requires a v2 peer.
    pub fn request_transactions_proof_by_hashes(
        &self,
        hashes: Vec<Blake2bHash>,
        block: Block,
    ) -> impl Future<Output = Result<Vec<Transaction>, ProofError>> {
        if self.peer.version < Peer::VERSION_PROOFS_BY_HASH {
            return flatten(None);
        }
        let msg =
            Message::GetTransactionsProofByHashes(Box::new(GetTransactionsProofByHashesMessage {
                block_hash: block.hash(),
                hashes: hashes.clone(),
            }));
        let rx = self.push_transactions_proof_request(block, Vec::new(), hashes, msg);
        flatten(Some(rx))
    }

    fn push_transactions_proof_request(
        &self,
        block: Block,
        addresses: Vec<Address>,
        hashes: Vec<Blake2bHash>,
        msg: Message,
    ) -> oneshot::Receiver<Result<Vec<Transaction>, ProofError>> {
        let (tx, rx) = oneshot::channel();
        let weak = self.self_weak.clone();
        let timeout = self.config.transactions_proof_request_timeout;
        let _ = self
            .synchronizer
            .push(SYNC_GET_TRANSACTIONS_PROOF, move |guard| {
                let this = match weak.upgrade() {
                    Some(this) => this,
                    None => return,
                };
                if this.peer.channel.closed() {
                    return;
                }
                {
                    let mut state = this.state.write();
                    debug_assert!(
                        state.transactions_proof_request.is_none(),
                        "transactions proof slot taken behind the synchronizer gate"
                    );
                    state.transactions_proof_request = Some(TransactionsProofRequest {
                        block,
                        addresses,
                        hashes,
                        resolver: tx,
                        _guard: guard,
                    });
                }
                this.peer.channel.send_or_close(msg);
                let weak = this.self_weak.clone();
                this.peer.channel.expect_message(
                    MessageType::TransactionsProof,
                    move || {
                        let this = upgrade_weak!(weak);
                        this.on_transactions_proof_timeout();
                    },
                    timeout,
                );
            });
        rx
    }

    fn on_transactions_proof_timeout(&self) {
        let pending = { self.state.write().transactions_proof_request.take() };
        if let Some(pending) = pending {
            warn!("Transactions proof request to {} timed out - closing the channel", self.peer);
            let _ = pending.resolver.send(Err(ProofError::Timeout));
            self.peer.channel.close(CloseType::GetTransactionsProofTimeout);
        }
    }

    pub(super) fn on_transactions_proof(&self, msg: TransactionsProofMessage) {
        let pending = { self.state.write().transactions_proof_request.take() };
        let pending = match pending {
            Some(pending) => pending,
            None => {
                warn!("Unsolicited transactions proof from {} - discarding", self.peer);
                return;
            }
        };
        let result = self.check_transactions_proof(&pending, msg);
        let _ = pending.resolver.send(result);
    }

    fn check_transactions_proof(
        &self,
        pending: &TransactionsProofRequest,
        msg: TransactionsProofMessage,
    ) -> Result<Vec<Transaction>, ProofError> {
        let proof = match msg.proof {
            Some(proof) => proof,
            None => {
                debug!("Peer {} did not provide the requested transactions proof", self.peer);
                return Err(ProofError::Rejected);
            }
        };

        if msg.block_hash != pending.block.hash() {
            debug!("Transactions proof from {} refers to the wrong block", self.peer);
            return Err(ProofError::Invalid("proof refers to a different block"));
        }

        let root = match proof.root() {
            Ok(root) => root,
            Err(_) => {
                warn!(
                    "Malformed transactions proof from {} - discarding and closing the channel",
                    self.peer
                );
                self.peer.channel.close(CloseType::InvalidTransactionProof);
                return Err(ProofError::Invalid("malformed merkle proof"));
            }
        };
        if root != pending.block.header.body_hash {
            warn!(
                "Invalid transactions proof from {} - discarding and closing the channel",
                self.peer
            );
            self.peer.channel.close(CloseType::InvalidTransactionProof);
            return Err(ProofError::Invalid("merkle root does not match the block body"));
        }

        // Every proven transaction must have been asked for.
        for transaction in proof.transactions.iter() {
            let matches_address = pending
                .addresses
                .iter()
                .any(|address| transaction.touches(address));
            let matches_hash = pending.hashes.contains(&transaction.hash());
            if !matches_address && !matches_hash {
                warn!(
                    "Transactions proof from {} contains an unrelated transaction - discarding and closing the channel",
                    self.peer
                );
                self.peer.channel.close(CloseType::InvalidTransactionProof);
                return Err(ProofError::Invalid("proof contains an unrelated transaction"));
            }
        }

        Ok(proof.transactions)
    }

    /// Requests inclusion receipts for all transactions touching `address`.
    pub fn request_transaction_receipts_by_address(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Vec<TransactionReceipt>, ProofError>> {
        let msg = Message::GetTransactionReceiptsByAddress(Box::new(
            GetTransactionReceiptsByAddressMessage { address },
        ));
        let rx = self.push_transaction_receipts_request(Some(address), None, msg);
        flatten(Some(rx))
    }

    /// Hash-addressed variant. Requires a v2 peer.
    pub fn request_transaction_receipts_by_hashes(
        &self,
        hashes: Vec<Blake2bHash>,
    ) -> impl Future<Output = Result<Vec<TransactionReceipt>, ProofError>> {
        if self.peer.version < Peer::VERSION_PROOFS_BY_HASH {
            return flatten(None);
        }
        let msg = Message::GetTransactionReceiptsByHashes(Box::new(
            GetTransactionReceiptsByHashesMessage {
                hashes: hashes.clone(),
            },
        ));
        let rx = self.push_transaction_receipts_request(None, Some(hashes), msg);
        flatten(Some(rx))
    }

    fn push_transaction_receipts_request(
        &self,
        address: Option<Address>,
        hashes: Option<Vec<Blake2bHash>>,
        msg: Message,
    ) -> oneshot::Receiver<Result<Vec<TransactionReceipt>, ProofError>> {
        let (tx, rx) = oneshot::channel();
        let weak = self.self_weak.clone();
        let timeout = self.config.transaction_receipts_request_timeout;
        let _ = self
            .synchronizer
            .push(SYNC_GET_TRANSACTION_RECEIPTS, move |guard| {
                let this = match weak.upgrade() {
                    Some(this) => this,
                    None => return,
                };
                if this.peer.channel.closed() {
                    return;
                }
                {
                    let mut state = this.state.write();
                    debug_assert!(
                        state.transaction_receipts_request.is_none(),
                        "transaction receipts slot taken behind the synchronizer gate"
                    );
                    state.transaction_receipts_request = Some(TransactionReceiptsRequest {
                        address,
                        hashes,
                        resolver: tx,
                        _guard: guard,
                    });
                }
                this.peer.channel.send_or_close(msg);
                let weak = this.self_weak.clone();
                this.peer.channel.expect_message(
                    MessageType::TransactionReceipts,
                    move || {
                        let this = upgrade_weak!(weak);
                        this.on_transaction_receipts_timeout();
                    },
                    timeout,
                );
            });
        rx
    }

    fn on_transaction_receipts_timeout(&self) {
        let pending = { self.state.write().transaction_receipts_request.take() };
        if let Some(pending) = pending {
            warn!(
                "Transaction receipts request to {} timed out - closing the channel",
                self.peer
            );
            let _ = pending.resolver.send(Err(ProofError::Timeout));
            self.peer
                .channel
                .close(CloseType::GetTransactionReceiptsTimeout);
        }
    }

    pub(super) fn on_transaction_receipts(&self, msg: TransactionReceiptsMessage) {
        let pending = { self.state.write().transaction_receipts_request.take() };
        let pending = match pending {
            Some(pending) => pending,
            None => {
                warn!("Unsolicited transaction receipts from {} - discarding", self.peer);
                return;
            }
        };
        let result = self.check_transaction_receipts(&pending, msg);
        let _ = pending.resolver.send(result);
    }

    fn check_transaction_receipts(
        &self,
        pending: &TransactionReceiptsRequest,
        msg: TransactionReceiptsMessage,
    ) -> Result<Vec<TransactionReceipt>, ProofError> {
        let receipts = match msg.receipts {
            Some(receipts) => receipts,
            None => {
                debug!("Peer {} did not provide the requested receipts", self.peer);
                return Err(ProofError::Rejected);
            }
        };

        // Receipts must stay within what was asked for.
        if let Some(address) = &pending.address {
            let all_touch = receipts
                .iter()
                .all(|receipt| &receipt.sender == address || &receipt.recipient == address);
            if !all_touch {
                debug!("Receipts from {} do not touch the requested address", self.peer);
                return Err(ProofError::Invalid("receipt does not touch the requested address"));
            }
        }
        if let Some(hashes) = &pending.hashes {
            let all_requested = receipts
                .iter()
                .all(|receipt| hashes.contains(&receipt.transaction_hash));
            if !all_requested {
                debug!("Receipts from {} cover transactions that were not requested", self.peer);
                return Err(ProofError::Invalid("receipt for a transaction that was not requested"));
            }
        }

        Ok(receipts)
    }
}
