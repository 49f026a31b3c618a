use std::fmt;

use parking_lot::RwLock;

use hash::Blake2bHash;
use network_primitives::Subscription;
use primitives::block::{Block, BlockHeader, BlockProof};
use primitives::transaction::{Transaction, TransactionReceipt, TransactionsProof};
use primitives::Address;
use utils::observer::PassThroughNotifier;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum InvVectorType {
    Block = 1,
    Transaction = 2,
}

/// Typed object identifier exchanged in `inv`, `get-data` and `not-found`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct InvVector {
    pub ty: InvVectorType,
    pub hash: Blake2bHash,
}

impl InvVector {
    /// Maximum number of vectors per inventory-carrying message.
    pub const VECTORS_MAX_COUNT: usize = 1000;

    pub fn new(ty: InvVectorType, hash: Blake2bHash) -> Self {
        InvVector { ty, hash }
    }

    pub fn from_block_hash(hash: Blake2bHash) -> Self {
        Self::new(InvVectorType::Block, hash)
    }

    pub fn from_tx_hash(hash: Blake2bHash) -> Self {
        Self::new(InvVectorType::Transaction, hash)
    }
}

impl fmt::Display for InvVector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}:{}", self.ty, self.hash)
    }
}

#[derive(Clone, Debug)]
pub struct TxMessage {
    pub transaction: Transaction,
}

impl TxMessage {
    pub fn new(transaction: Transaction) -> Message {
        Message::Tx(Box::new(TxMessage { transaction }))
    }
}

#[derive(Clone, Debug)]
pub struct GetBlockProofMessage {
    pub block_hash_to_prove: Blake2bHash,
    pub known_block_hash: Blake2bHash,
}

#[derive(Clone, Debug)]
pub struct GetBlockProofAtMessage {
    pub block_height_to_prove: u32,
    pub known_block_hash: Blake2bHash,
}

#[derive(Clone, Debug)]
pub struct BlockProofMessage {
    pub proof: Option<BlockProof>,
}

impl BlockProofMessage {
    pub fn new(proof: Option<BlockProof>) -> Message {
        Message::BlockProof(Box::new(BlockProofMessage { proof }))
    }

    pub fn empty() -> Message {
        Self::new(None)
    }
}

#[derive(Clone, Debug)]
pub struct GetTransactionsProofByAddressesMessage {
    pub block_hash: Blake2bHash,
    pub addresses: Vec<Address>,
}

#[derive(Clone, Debug)]
pub struct GetTransactionsProofByHashesMessage {
    pub block_hash: Blake2bHash,
    pub hashes: Vec<Blake2bHash>,
}

#[derive(Clone, Debug)]
pub struct TransactionsProofMessage {
    pub block_hash: Blake2bHash,
    pub proof: Option<TransactionsProof>,
}

impl TransactionsProofMessage {
    pub fn new(block_hash: Blake2bHash, proof: Option<TransactionsProof>) -> Message {
        Message::TransactionsProof(Box::new(TransactionsProofMessage { block_hash, proof }))
    }
}

#[derive(Clone, Debug)]
pub struct GetTransactionReceiptsByAddressMessage {
    pub address: Address,
}

#[derive(Clone, Debug)]
pub struct GetTransactionReceiptsByHashesMessage {
    pub hashes: Vec<Blake2bHash>,
}

#[derive(Clone, Debug)]
pub struct TransactionReceiptsMessage {
    pub receipts: Option<Vec<TransactionReceipt>>,
}

impl TransactionReceiptsMessage {
    /// Maximum number of receipts per message.
    pub const RECEIPTS_MAX_COUNT: usize = 500;

    pub fn new(receipts: Option<Vec<TransactionReceipt>>) -> Message {
        Message::TransactionReceipts(Box::new(TransactionReceiptsMessage { receipts }))
    }

    pub fn empty() -> Message {
        Self::new(None)
    }
}

#[derive(Clone, Debug)]
pub enum Message {
    Inv(Vec<InvVector>),
    GetData(Vec<InvVector>),
    GetHeader(Vec<InvVector>),
    NotFound(Vec<InvVector>),
    Block(Box<Block>),
    Header(Box<BlockHeader>),
    Tx(Box<TxMessage>),
    Mempool,
    Subscribe(Box<Subscription>),
    GetHead,
    Head(Box<BlockHeader>),

    GetBlockProof(Box<GetBlockProofMessage>),
    GetBlockProofAt(Box<GetBlockProofAtMessage>),
    BlockProof(Box<BlockProofMessage>),
    GetTransactionsProofByAddresses(Box<GetTransactionsProofByAddressesMessage>),
    GetTransactionsProofByHashes(Box<GetTransactionsProofByHashesMessage>),
    TransactionsProof(Box<TransactionsProofMessage>),
    GetTransactionReceiptsByAddress(Box<GetTransactionReceiptsByAddressMessage>),
    GetTransactionReceiptsByHashes(Box<GetTransactionReceiptsByHashesMessage>),
    TransactionReceipts(Box<TransactionReceiptsMessage>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MessageType {
    Inv,
    GetData,
    GetHeader,
    NotFound,
    Block,
    Header,
    Tx,
    Mempool,
    Subscribe,
    GetHead,
    Head,
    GetBlockProof,
    GetBlockProofAt,
    BlockProof,
    GetTransactionsProofByAddresses,
    GetTransactionsProofByHashes,
    TransactionsProof,
    GetTransactionReceiptsByAddress,
    GetTransactionReceiptsByHashes,
    TransactionReceipts,
}

impl Message {
    pub fn ty(&self) -> MessageType {
        match self {
            Message::Inv(_) => MessageType::Inv,
            Message::GetData(_) => MessageType::GetData,
            Message::GetHeader(_) => MessageType::GetHeader,
            Message::NotFound(_) => MessageType::NotFound,
            Message::Block(_) => MessageType::Block,
            Message::Header(_) => MessageType::Header,
            Message::Tx(_) => MessageType::Tx,
            Message::Mempool => MessageType::Mempool,
            Message::Subscribe(_) => MessageType::Subscribe,
            Message::GetHead => MessageType::GetHead,
            Message::Head(_) => MessageType::Head,
            Message::GetBlockProof(_) => MessageType::GetBlockProof,
            Message::GetBlockProofAt(_) => MessageType::GetBlockProofAt,
            Message::BlockProof(_) => MessageType::BlockProof,
            Message::GetTransactionsProofByAddresses(_) => {
                MessageType::GetTransactionsProofByAddresses
            }
            Message::GetTransactionsProofByHashes(_) => MessageType::GetTransactionsProofByHashes,
            Message::TransactionsProof(_) => MessageType::TransactionsProof,
            Message::GetTransactionReceiptsByAddress(_) => {
                MessageType::GetTransactionReceiptsByAddress
            }
            Message::GetTransactionReceiptsByHashes(_) => {
                MessageType::GetTransactionReceiptsByHashes
            }
            Message::TransactionReceipts(_) => MessageType::TransactionReceipts,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Splits an inbound message stream into one notifier per message type the
/// agent consumes.
#[derive(Default)]
pub struct MessageNotifier {
    pub inv: RwLock<PassThroughNotifier<'static, Vec<InvVector>>>,
    pub get_data: RwLock<PassThroughNotifier<'static, Vec<InvVector>>>,
    pub get_header: RwLock<PassThroughNotifier<'static, Vec<InvVector>>>,
    pub not_found: RwLock<PassThroughNotifier<'static, Vec<InvVector>>>,
    pub block: RwLock<PassThroughNotifier<'static, Block>>,
    pub header: RwLock<PassThroughNotifier<'static, BlockHeader>>,
    pub tx: RwLock<PassThroughNotifier<'static, TxMessage>>,
    pub mempool: RwLock<PassThroughNotifier<'static, ()>>,
    pub subscribe: RwLock<PassThroughNotifier<'static, Subscription>>,
    pub get_head: RwLock<PassThroughNotifier<'static, ()>>,
    pub head: RwLock<PassThroughNotifier<'static, BlockHeader>>,
    pub block_proof: RwLock<PassThroughNotifier<'static, BlockProofMessage>>,
    pub transactions_proof: RwLock<PassThroughNotifier<'static, TransactionsProofMessage>>,
    pub transaction_receipts: RwLock<PassThroughNotifier<'static, TransactionReceiptsMessage>>,
}

impl MessageNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, msg: Message) {
        match msg {
            Message::Inv(vectors) => self.inv.read().notify(vectors),
            Message::GetData(vectors) => self.get_data.read().notify(vectors),
            Message::GetHeader(vectors) => self.get_header.read().notify(vectors),
            Message::NotFound(vectors) => self.not_found.read().notify(vectors),
            Message::Block(block) => self.block.read().notify(*block),
            Message::Header(header) => self.header.read().notify(*header),
            Message::Tx(msg) => self.tx.read().notify(*msg),
            Message::Mempool => self.mempool.read().notify(()),
            Message::Subscribe(subscription) => self.subscribe.read().notify(*subscription),
            Message::GetHead => self.get_head.read().notify(()),
            Message::Head(header) => self.head.read().notify(*header),
            Message::BlockProof(msg) => self.block_proof.read().notify(*msg),
            Message::TransactionsProof(msg) => self.transactions_proof.read().notify(*msg),
            Message::TransactionReceipts(msg) => self.transaction_receipts.read().notify(*msg),
            // Request types the agent does not serve are dropped here;
            // proof serving is the full node's concern.
            Message::GetBlockProof(_)
            | Message::GetBlockProofAt(_)
            | Message::GetTransactionsProofByAddresses(_)
            | Message::GetTransactionsProofByHashes(_)
            | Message::GetTransactionReceiptsByAddress(_)
            | Message::GetTransactionReceiptsByHashes(_) => {}
        }
    }

}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use hash::Hasher;

    use super::*;

    #[test]
    fn inv_vector_identity_covers_type_and_hash() {
        let hash: Blake2bHash = hash::Blake2bHasher::default().digest(b"x");
        let a = InvVector::from_block_hash(hash.clone());
        let b = InvVector::from_tx_hash(hash.clone());
        let c = InvVector::from_block_hash(hash);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn notifier_dispatches_by_type() {
        let notifier = MessageNotifier::new();
        let invs = Arc::new(AtomicUsize::new(0));
        let invs2 = Arc::clone(&invs);
        notifier.inv.write().register(move |vectors: Vec<InvVector>| {
            invs2.fetch_add(vectors.len(), Ordering::SeqCst);
        });

        notifier.notify(Message::Inv(vec![InvVector::from_block_hash(
            Blake2bHash::default(),
        )]));
        notifier.notify(Message::Mempool);
        assert_eq!(invs.load(Ordering::SeqCst), 1);
    }
}
