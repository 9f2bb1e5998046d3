//! Merkle tree with inclusion proofs over 32-byte leaves.
//!
//! Odd-length levels duplicate their final node. An empty tree collapses to
//! a single zero leaf, so its root is 32 zero bytes.

use crate::hash::sha256;
use axon_types::app::{ChainTransaction, Hash256};

/// A binary Merkle tree over 32-byte leaf hashes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<Hash256>,
    /// Levels from leaves (index 0) up to the root level.
    levels: Vec<Vec<Hash256>>,
}

/// One step of an inclusion proof: the sibling hash and whether it sits on
/// the left of the path node.
pub type ProofStep = (Hash256, bool);

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = [0u8; 64];
    let (l, r) = data.split_at_mut(32);
    l.copy_from_slice(left);
    r.copy_from_slice(right);
    sha256(&data)
}

impl MerkleTree {
    /// Builds a tree over `leaves`. An empty input becomes a single zero
    /// leaf.
    pub fn new(leaves: Vec<Hash256>) -> Self {
        let leaves = if leaves.is_empty() {
            vec![[0u8; 32]]
        } else {
            leaves
        };

        let mut levels = vec![leaves.clone()];
        while let Some(current) = levels.last() {
            if current.len() <= 1 {
                break;
            }
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            let mut iter = current.chunks(2);
            for pair in &mut iter {
                match pair {
                    [left, right] => next.push(hash_pair(left, right)),
                    // Odd node: duplicate it.
                    [last] => next.push(hash_pair(last, last)),
                    _ => {}
                }
            }
            levels.push(next);
        }

        MerkleTree { leaves, levels }
    }

    /// Builds a tree over transaction hashes.
    pub fn from_transactions(transactions: &[ChainTransaction]) -> Self {
        MerkleTree::new(transactions.iter().map(|tx| tx.hash()).collect())
    }

    /// The root hash.
    pub fn root(&self) -> Hash256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// True when the tree holds only the implicit zero leaf.
    pub fn is_empty(&self) -> bool {
        self.leaves == [[0u8; 32]]
    }

    /// Builds the inclusion proof for the leaf at `index`. Returns an empty
    /// proof for out-of-range indices.
    pub fn proof(&self, index: usize) -> Vec<ProofStep> {
        if index >= self.leaves.len() {
            return Vec::new();
        }

        let mut proof = Vec::new();
        let mut position = index;
        // Walk every level below the root.
        for level in self.levels.iter().take(self.levels.len().saturating_sub(1)) {
            let sibling_index = if position % 2 == 0 {
                position + 1
            } else {
                position - 1
            };
            let sibling = level
                .get(sibling_index)
                .or_else(|| level.get(position))
                .copied();
            if let Some(hash) = sibling {
                proof.push((hash, position % 2 == 1));
            }
            position /= 2;
        }
        proof
    }

    /// Verifies an inclusion proof against a root.
    pub fn verify_proof(leaf: Hash256, proof: &[ProofStep], root: Hash256) -> bool {
        let mut current = leaf;
        for (sibling, sibling_is_left) in proof {
            current = if *sibling_is_left {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }
        current == root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n).map(|i| sha256(&[i as u8])).collect()
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let tree = MerkleTree::new(Vec::new());
        assert_eq!(tree.root(), [0u8; 32]);
        assert!(tree.is_empty());
    }

    #[test]
    fn single_leaf_is_the_root() {
        let leaf = sha256(b"only");
        let tree = MerkleTree::new(vec![leaf]);
        assert_eq!(tree.root(), leaf);
    }

    #[test]
    fn proofs_verify_for_every_leaf() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let tree = MerkleTree::new(leaves.clone());
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = tree.proof(i);
                assert!(
                    MerkleTree::verify_proof(*leaf, &proof, tree.root()),
                    "proof failed for leaf {} of {}",
                    i,
                    n
                );
            }
        }
    }

    #[test]
    fn proof_fails_for_wrong_leaf() {
        let leaves = leaves(5);
        let tree = MerkleTree::new(leaves.clone());
        let proof = tree.proof(2);
        assert!(!MerkleTree::verify_proof(leaves[3], &proof, tree.root()));
        assert!(!MerkleTree::verify_proof(sha256(b"forged"), &proof, tree.root()));
    }

    #[test]
    fn out_of_range_proof_is_empty() {
        let tree = MerkleTree::new(leaves(3));
        assert!(tree.proof(3).is_empty());
    }

    #[test]
    fn odd_levels_duplicate_last_node() {
        // With three leaves, the third is paired with itself.
        let l = leaves(3);
        let tree = MerkleTree::new(l.clone());
        let left = hash_pair(&l[0], &l[1]);
        let right = hash_pair(&l[2], &l[2]);
        assert_eq!(tree.root(), hash_pair(&left, &right));
    }

    #[test]
    fn root_changes_with_any_leaf() {
        let base = MerkleTree::new(leaves(4));
        let mut mutated = leaves(4);
        mutated[2][0] ^= 1;
        assert_ne!(base.root(), MerkleTree::new(mutated).root());
    }
}
