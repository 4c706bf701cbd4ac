//! Sorted-pair Merkle proofs.
//!
//! Each step hashes the smaller of (accumulator, sibling) first, so a proof
//! carries no left/right flags and verification does not depend on the
//! position of the leaf. Ordering is byte-lexicographic; on equality the
//! sibling goes first. The leaf of an operation is its id, unhashed. All
//! three rules must match the ledger validators bit for bit or their roots
//! will not verify.

use trinity_types::constants::MAX_MERKLE_DEPTH;
use trinity_types::error::TrinityError;
use trinity_types::primitives::{Hash, OperationId, ZERO_HASH};

use crate::hash::keccak256_multi;

/// Hash two nodes in sorted order.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    if a < b {
        keccak256_multi(&[a, b])
    } else {
        keccak256_multi(&[b, a])
    }
}

/// The leaf committed for an operation: the validators fold the operation id
/// itself.
pub fn operation_leaf(operation_id: &OperationId) -> Hash {
    *operation_id
}

/// Fold a leaf with its sibling path.
pub fn compute_root(leaf: &Hash, sibling_path: &[Hash]) -> Hash {
    sibling_path
        .iter()
        .fold(*leaf, |acc, sibling| hash_pair(&acc, sibling))
}

/// Check that `leaf` and `sibling_path` reproduce `claimed_root`.
///
/// Never panics. Returns false for a zero root, a path longer than
/// `max_depth` (itself capped at [`MAX_MERKLE_DEPTH`]), or a mismatch.
pub fn verify(leaf: &Hash, sibling_path: &[Hash], claimed_root: &Hash, max_depth: usize) -> bool {
    if *claimed_root == ZERO_HASH {
        return false;
    }
    if sibling_path.len() > max_depth.min(MAX_MERKLE_DEPTH) {
        return false;
    }
    compute_root(leaf, sibling_path) == *claimed_root
}

/// Binary Merkle tree built bottom-up with sorted-pair hashing.
///
/// An odd node at the end of a level is carried up unchanged, so its proof
/// simply has no sibling at that level.
#[derive(Debug, Clone)]
pub struct SortedMerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl SortedMerkleTree {
    /// Build a tree over the given leaves, in insertion order.
    pub fn from_leaves(leaves: Vec<Hash>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().map(|l| l.len() > 1).unwrap_or(false) {
            let current = &levels[levels.len() - 1];
            let next: Vec<Hash> = current
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    [a] => *a,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Root hash, or the zero hash for an empty tree.
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(ZERO_HASH)
    }

    /// Sibling path for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Result<Vec<Hash>, TrinityError> {
        if index >= self.leaf_count() {
            return Err(TrinityError::LeafIndexOutOfRange {
                index,
                leaves: self.leaf_count(),
            });
        }
        let mut path = Vec::with_capacity(self.levels.len());
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = idx ^ 1;
            if sibling < level.len() {
                path.push(level[sibling]);
            }
            idx /= 2;
        }
        if path.len() > MAX_MERKLE_DEPTH {
            return Err(TrinityError::MerklePathTooLong {
                depth: path.len(),
                max: MAX_MERKLE_DEPTH,
            });
        }
        Ok(path)
    }
}
