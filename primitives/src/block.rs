use std::io;

use hash::{Blake2bHash, Hash, SerializeContent};
use utils::merkle::{compute_root_from_content, compute_root_from_hashes};

use crate::transaction::Transaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u16,
    pub prev_hash: Blake2bHash,
    pub interlink_hash: Blake2bHash,
    pub body_hash: Blake2bHash,
    pub height: u32,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Blake2bHash {
        Hash::hash(self)
    }
}

impl SerializeContent for BlockHeader {
    fn serialize_content<W: io::Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut size = 0;
        writer.write_all(&self.version.to_be_bytes())?;
        size += 2;
        size += self.prev_hash.serialize_content(writer)?;
        size += self.interlink_hash.serialize_content(writer)?;
        size += self.body_hash.serialize_content(writer)?;
        writer.write_all(&self.height.to_be_bytes())?;
        size += 4;
        writer.write_all(&self.timestamp.to_be_bytes())?;
        size += 8;
        Ok(size)
    }
}

impl Hash for BlockHeader {}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        BlockBody { transactions }
    }

    /// Merkle root over the contained transactions.
    pub fn hash(&self) -> Blake2bHash {
        compute_root_from_content(&self.transactions)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// Hashes of selected ancestors, newest first. Committed to by
    /// `header.interlink_hash`.
    pub interlink: Vec<Blake2bHash>,
    pub body: Option<BlockBody>,
}

impl Block {
    /// Maximum tolerated clock drift of a block timestamp into the future.
    const TIMESTAMP_DRIFT_MAX: u64 = 600;

    pub fn new(header: BlockHeader, interlink: Vec<Blake2bHash>, body: Option<BlockBody>) -> Self {
        Block {
            header,
            interlink,
            body,
        }
    }

    pub fn hash(&self) -> Blake2bHash {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn transactions(&self) -> Option<&Vec<Transaction>> {
        self.body.as_ref().map(|body| &body.transactions)
    }

    pub fn transactions_mut(&mut self) -> Option<&mut Vec<Transaction>> {
        self.body.as_mut().map(|body| &mut body.transactions)
    }

    pub fn interlink_hash(&self) -> Blake2bHash {
        compute_root_from_hashes(&self.interlink)
    }

    /// Whether this block references `predecessor` via its predecessor link
    /// or its interlink.
    pub fn is_interlink_successor_of(&self, predecessor: &Block) -> bool {
        let hash = predecessor.hash();
        self.header.prev_hash == hash || self.interlink.contains(&hash)
    }

    /// Intrinsic validity: interlink and body must match their header
    /// commitments, the height must be non-zero and the timestamp must not
    /// lie too far in the future. `now` is the current unix time in seconds.
    pub fn verify(&self, now: u64) -> bool {
        if self.header.height == 0 {
            return false;
        }
        if self.header.timestamp > now + Self::TIMESTAMP_DRIFT_MAX {
            return false;
        }
        if self.interlink_hash() != self.header.interlink_hash {
            return false;
        }
        if let Some(ref body) = self.body {
            if body.hash() != self.header.body_hash {
                return false;
            }
        }
        true
    }
}

/// An interlink chain proving that its tail block is an ancestor of the block
/// following its head. Blocks are ordered oldest (tail, the block being
/// proven) to newest (head).
#[derive(Clone, Debug)]
pub struct BlockProof {
    pub blocks: Vec<Block>,
}

impl BlockProof {
    pub fn new(blocks: Vec<Block>) -> Self {
        BlockProof { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// The proven (oldest) block.
    pub fn tail(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// The newest block; the verifier's known block must succeed it.
    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Structural check: every block must be an interlink successor of its
    /// predecessor in the proof.
    pub fn verify(&self) -> bool {
        !self.blocks.is_empty()
            && self
                .blocks
                .windows(2)
                .all(|pair| pair[1].is_interlink_successor_of(&pair[0]))
    }
}

#[cfg(test)]
mod tests {
    use crate::account::Address;
    use crate::coin::Coin;

    use super::*;

    fn body(seed: u8) -> BlockBody {
        BlockBody::new(vec![Transaction::new(
            Address::from_bytes([seed; 20]),
            Address::from_bytes([seed + 1; 20]),
            Coin::from_units(5),
            Coin::from_units(1),
            1,
            vec![],
        )])
    }

    fn block_after(predecessor: Option<&Block>, height: u32, interlink: Vec<Blake2bHash>) -> Block {
        let body = body(height as u8);
        let header = BlockHeader {
            version: 1,
            prev_hash: predecessor.map(Block::hash).unwrap_or_default(),
            interlink_hash: compute_root_from_hashes(&interlink),
            body_hash: body.hash(),
            height,
            timestamp: 1_000_000 + u64::from(height),
        };
        Block::new(header, interlink, Some(body))
    }

    const NOW: u64 = 2_000_000;

    #[test]
    fn verify_accepts_consistent_blocks() {
        let block = block_after(None, 1, vec![]);
        assert!(block.verify(NOW));
    }

    #[test]
    fn verify_rejects_body_mismatch() {
        let mut block = block_after(None, 1, vec![]);
        block.body = Some(body(9));
        assert!(!block.verify(NOW));
    }

    #[test]
    fn verify_rejects_interlink_mismatch() {
        let mut block = block_after(None, 1, vec![]);
        block.interlink = vec![Blake2bHash::default()];
        assert!(!block.verify(NOW));
    }

    #[test]
    fn verify_rejects_future_timestamps() {
        let block = block_after(None, 1, vec![]);
        assert!(!block.verify(100));
    }

    #[test]
    fn successor_relation_follows_prev_and_interlink() {
        let a = block_after(None, 1, vec![]);
        let b = block_after(Some(&a), 2, vec![]);
        assert!(b.is_interlink_successor_of(&a));
        assert!(!a.is_interlink_successor_of(&b));

        let distant = block_after(None, 10, vec![a.hash()]);
        assert!(distant.is_interlink_successor_of(&a));
    }

    #[test]
    fn block_proof_verifies_chained_blocks() {
        let a = block_after(None, 1, vec![]);
        let b = block_after(Some(&a), 2, vec![]);
        let c = block_after(None, 7, vec![b.hash()]);

        let proof = BlockProof::new(vec![a.clone(), b.clone(), c.clone()]);
        assert!(proof.verify());
        assert_eq!(proof.tail().unwrap().hash(), a.hash());
        assert_eq!(proof.head().unwrap().hash(), c.hash());

        let broken = BlockProof::new(vec![a, c, b]);
        assert!(!broken.verify());
        assert!(!BlockProof::new(vec![]).verify());
    }
}
