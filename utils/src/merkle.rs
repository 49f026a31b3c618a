use hash::{Hash, HashOutput, Hasher};

/// Computes the merkle root over the content hashes of `values`.
///
/// The tree splits ranges at `ceil(n / 2)`; a single element is its own
/// subtree root, the empty list hashes to the digest of the empty input.
pub fn compute_root_from_content<H: HashOutput, T: Hash>(values: &[T]) -> H {
    let hashes: Vec<H> = values.iter().map(|v| v.hash()).collect();
    compute_root_from_hashes(&hashes)
}

pub fn compute_root_from_hashes<H: HashOutput>(hashes: &[H]) -> H {
    match hashes.len() {
        0 => H::Builder::default().finish(),
        1 => hashes[0].clone(),
        len => {
            let mid = len.div_ceil(2);
            let left = compute_root_from_hashes(&hashes[..mid]);
            let right = compute_root_from_hashes(&hashes[mid..]);
            H::Builder::default().chain(&left).chain(&right).finish()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MerkleProofOperation {
    ConsumeProof,
    ConsumeInput,
    Hash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMerkleProofError {
    #[error("merkle proof is malformed")]
    Malformed,
    #[error("merkle proof does not cover the given values")]
    ValueMismatch,
}

/// A merkle multi-proof: the subtree roots not covered by the proven values
/// plus the operation sequence that recombines them into the tree root.
#[derive(Clone, Debug)]
pub struct MerkleProof<H: HashOutput> {
    nodes: Vec<H>,
    operations: Vec<MerkleProofOperation>,
}

impl<H: HashOutput> MerkleProof<H> {
    /// Builds a proof over `values` for the leaves at `included` positions.
    pub fn from_values<T: Hash>(values: &[T], included: &[usize]) -> Self {
        let hashes: Vec<H> = values.iter().map(|v| v.hash()).collect();
        let flags: Vec<bool> = (0..hashes.len()).map(|i| included.contains(&i)).collect();
        let mut proof = MerkleProof {
            nodes: Vec::new(),
            operations: Vec::new(),
        };
        if !hashes.is_empty() {
            proof.build(&hashes, &flags);
        }
        proof
    }

    fn build(&mut self, hashes: &[H], flags: &[bool]) -> H {
        if !flags.iter().any(|&f| f) {
            let root = compute_root_from_hashes(hashes);
            self.operations.push(MerkleProofOperation::ConsumeProof);
            self.nodes.push(root.clone());
            return root;
        }
        if hashes.len() == 1 {
            self.operations.push(MerkleProofOperation::ConsumeInput);
            return hashes[0].clone();
        }
        let mid = hashes.len().div_ceil(2);
        let left = self.build(&hashes[..mid], &flags[..mid]);
        let right = self.build(&hashes[mid..], &flags[mid..]);
        self.operations.push(MerkleProofOperation::Hash);
        H::Builder::default().chain(&left).chain(&right).finish()
    }

    /// Recomputes the root, consuming the content hashes of `values` for the
    /// proven leaves.
    pub fn compute_root<T: Hash>(&self, values: &[T]) -> Result<H, InvalidMerkleProofError> {
        let mut inputs = values.iter().map(|v| v.hash::<H>());
        let mut proof_nodes = self.nodes.iter();
        let mut stack: Vec<H> = Vec::new();

        for operation in &self.operations {
            match operation {
                MerkleProofOperation::ConsumeProof => {
                    let node = proof_nodes.next().ok_or(InvalidMerkleProofError::Malformed)?;
                    stack.push(node.clone());
                }
                MerkleProofOperation::ConsumeInput => {
                    let hash = inputs.next().ok_or(InvalidMerkleProofError::ValueMismatch)?;
                    stack.push(hash);
                }
                MerkleProofOperation::Hash => {
                    let right = stack.pop().ok_or(InvalidMerkleProofError::Malformed)?;
                    let left = stack.pop().ok_or(InvalidMerkleProofError::Malformed)?;
                    stack.push(H::Builder::default().chain(&left).chain(&right).finish());
                }
            }
        }

        if stack.len() != 1 || inputs.next().is_some() || proof_nodes.next().is_some() {
            return Err(InvalidMerkleProofError::Malformed);
        }
        Ok(stack.pop().unwrap())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use hash::Blake2bHash;

    use super::*;

    fn values() -> Vec<Vec<u8>> {
        (0u8..7).map(|i| vec![i; 4]).collect()
    }

    #[test]
    fn proof_over_subset_reproduces_the_root() {
        let values = values();
        let root: Blake2bHash = compute_root_from_content(&values);

        for included in [vec![0], vec![2, 5], vec![0, 1, 2, 3, 4, 5, 6]] {
            let proof: MerkleProof<Blake2bHash> = MerkleProof::from_values(&values, &included);
            let proven: Vec<Vec<u8>> = included.iter().map(|&i| values[i].clone()).collect();
            assert_eq!(proof.compute_root(&proven).unwrap(), root);
        }
    }

    #[test]
    fn proof_rejects_wrong_values() {
        let values = values();
        let root: Blake2bHash = compute_root_from_content(&values);
        let proof: MerkleProof<Blake2bHash> = MerkleProof::from_values(&values, &[1]);

        let forged = vec![vec![0xffu8; 4]];
        let result = proof.compute_root(&forged);
        assert!(result.is_err() || result.unwrap() != root);
    }

    #[test]
    fn proof_rejects_value_count_mismatch() {
        let values = values();
        let proof: MerkleProof<Blake2bHash> = MerkleProof::from_values(&values, &[1]);
        let too_many = vec![values[1].clone(), values[2].clone()];
        assert_eq!(
            proof.compute_root(&too_many),
            Err(InvalidMerkleProofError::Malformed)
        );
        let too_few: Vec<Vec<u8>> = Vec::new();
        assert_eq!(
            proof.compute_root(&too_few),
            Err(InvalidMerkleProofError::ValueMismatch)
        );
    }

    #[test]
    fn single_and_empty_roots() {
        let one = vec![vec![1u8, 2, 3]];
        let root: Blake2bHash = compute_root_from_content(&one);
        let leaf: Blake2bHash = hash::Hash::hash(&one[0]);
        assert_eq!(root, leaf);

        let none: Vec<Vec<u8>> = Vec::new();
        let empty_root: Blake2bHash = compute_root_from_content(&none);
        let expected: Blake2bHash = hash::Blake2bHasher::default().digest(b"");
        assert_eq!(empty_root, expected);
    }
}
