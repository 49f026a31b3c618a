use std::io;

use hash::{Blake2bHash, Hash, SerializeContent};
use utils::merkle::{InvalidMerkleProofError, MerkleProof};

use crate::account::Address;
use crate::coin::Coin;

/// A value transfer between two accounts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub value: Coin,
    pub fee: Coin,
    pub validity_start_height: u32,
    pub data: Vec<u8>,
}

impl Transaction {
    /// Fixed per-transaction overhead: sender, recipient, value, fee,
    /// validity start height and the data length prefix.
    const BASE_SIZE: usize = Address::SIZE * 2 + 8 + 8 + 4 + 2;

    pub fn new(
        sender: Address,
        recipient: Address,
        value: Coin,
        fee: Coin,
        validity_start_height: u32,
        data: Vec<u8>,
    ) -> Self {
        Transaction {
            sender,
            recipient,
            value,
            fee,
            validity_start_height,
            data,
        }
    }

    pub fn hash(&self) -> Blake2bHash {
        Hash::hash(self)
    }

    pub fn serialized_size(&self) -> usize {
        Self::BASE_SIZE + self.data.len()
    }

    pub fn fee_per_byte(&self) -> f64 {
        u64::from(self.fee) as f64 / self.serialized_size() as f64
    }

    /// Whether `address` is the sender or the recipient.
    pub fn touches(&self, address: &Address) -> bool {
        &self.sender == address || &self.recipient == address
    }
}

impl SerializeContent for Transaction {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut size = 0;
        size += self.sender.serialize_content(writer)?;
        size += self.recipient.serialize_content(writer)?;
        size += self.value.serialize_content(writer)?;
        size += self.fee.serialize_content(writer)?;
        writer.write_all(&self.validity_start_height.to_be_bytes())?;
        size += 4;
        writer.write_all(&(self.data.len() as u16).to_be_bytes())?;
        size += 2;
        writer.write_all(&self.data)?;
        size += self.data.len();
        Ok(size)
    }
}

impl Hash for Transaction {}

/// Compact attestation of a transaction's inclusion, suitable for clients
/// that do not keep block bodies. Carries the accounts the transaction
/// touches so a response can be checked against the requested address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: Blake2bHash,
    pub block_hash: Blake2bHash,
    pub block_height: u32,
    pub sender: Address,
    pub recipient: Address,
}

/// A merkle proof that `transactions` are part of a block body.
#[derive(Clone, Debug)]
pub struct TransactionsProof {
    pub transactions: Vec<Transaction>,
    pub proof: MerkleProof<Blake2bHash>,
}

impl TransactionsProof {
    pub fn new(transactions: Vec<Transaction>, proof: MerkleProof<Blake2bHash>) -> Self {
        TransactionsProof {
            transactions,
            proof,
        }
    }

    /// Builds a proof for the transactions at `included` positions within the
    /// full body transaction list.
    pub fn from_body_transactions(all: &[Transaction], included: &[usize]) -> Self {
        let transactions = included.iter().map(|&i| all[i].clone()).collect();
        TransactionsProof {
            transactions,
            proof: MerkleProof::from_values(all, included),
        }
    }

    /// Recomputes the body root covered by this proof.
    pub fn root(&self) -> Result<Blake2bHash, InvalidMerkleProofError> {
        self.proof.compute_root(&self.transactions)
    }
}
