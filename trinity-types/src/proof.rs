use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerId;
use crate::primitives::*;

/// Block on the proving ledger at which the root was committed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BlockReference {
    pub number: u64,
    pub hash: Hash,
}

/// Proof material returned by a ledger's validator for one operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ProofMaterial {
    pub merkle_root: Hash,
    pub sibling_path: Vec<Hash>,
    pub block_reference: BlockReference,
    /// When the root was committed on the proving ledger.
    pub root_timestamp: Timestamp,
}

/// Evidence submitted by or for one ledger for one operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ChainProof {
    pub operation_id: OperationId,
    pub ledger_id: LedgerId,
    /// Leaf as claimed by the caller. Never trusted: the coordinator
    /// recomputes the leaf and rejects the proof if this differs.
    pub claimed_leaf: Option<Hash>,
    pub merkle_root: Hash,
    pub sibling_path: Vec<Hash>,
    pub block_reference: BlockReference,
    /// Commitment time of `merkle_root` on the proving ledger.
    pub timestamp: Timestamp,
    pub submitter: PublicKey,
    #[serde(with = "crate::primitives::serde_sig")]
    pub submitter_signature: Signature,
}

impl ChainProof {
    /// Assemble an unsigned proof from validator material.
    pub fn from_material(
        operation_id: OperationId,
        ledger_id: LedgerId,
        material: ProofMaterial,
        submitter: PublicKey,
    ) -> Self {
        Self {
            operation_id,
            ledger_id,
            claimed_leaf: None,
            merkle_root: material.merkle_root,
            sibling_path: material.sibling_path,
            block_reference: material.block_reference,
            timestamp: material.root_timestamp,
            submitter,
            submitter_signature: [0u8; 64],
        }
    }

    /// Bytes covered by the submitter signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(160 + self.sibling_path.len() * 32);
        data.extend_from_slice(b"trinity:proof:");
        data.extend_from_slice(&self.operation_id);
        data.push(self.ledger_id.as_u8());
        match &self.claimed_leaf {
            Some(leaf) => {
                data.push(1);
                data.extend_from_slice(leaf);
            }
            None => data.push(0),
        }
        data.extend_from_slice(&self.merkle_root);
        data.extend_from_slice(&(self.sibling_path.len() as u32).to_le_bytes());
        for sibling in &self.sibling_path {
            data.extend_from_slice(sibling);
        }
        data.extend_from_slice(&self.block_reference.number.to_le_bytes());
        data.extend_from_slice(&self.block_reference.hash);
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.submitter);
        data
    }
}

/// A proof wrapped as a ledger transaction from the relaying identity.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ProofSubmission {
    pub proof: ChainProof,
    /// Sender nonce on the submission lane for `proof.ledger_id`.
    pub nonce: Nonce,
    /// Fee offered for inclusion.
    pub fee: Amount,
}

/// Result of an accepted proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofReceipt {
    pub valid_proof_count: usize,
    pub status: crate::operation::OperationStatus,
    /// True when this proof crossed the threshold and executed the operation.
    pub executed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_proof() -> ChainProof {
        ChainProof {
            operation_id: [1u8; 32],
            ledger_id: LedgerId::Solana,
            claimed_leaf: None,
            merkle_root: [2u8; 32],
            sibling_path: vec![[3u8; 32], [4u8; 32]],
            block_reference: BlockReference {
                number: 7,
                hash: [5u8; 32],
            },
            timestamp: 1_000,
            submitter: [6u8; 32],
            submitter_signature: [0u8; 64],
        }
    }

    #[test]
    fn test_signing_bytes_exclude_signature() {
        let a = make_proof();
        let mut b = a.clone();
        b.submitter_signature = [1u8; 64];
        assert_eq!(a.signing_bytes(), b.signing_bytes());
    }

    #[test]
    fn test_signing_bytes_bind_path_order() {
        let a = make_proof();
        let mut b = a.clone();
        b.sibling_path.reverse();
        assert_ne!(a.signing_bytes(), b.signing_bytes());
    }

    #[test]
    fn test_signing_bytes_bind_ledger() {
        let a = make_proof();
        let mut b = a.clone();
        b.ledger_id = LedgerId::Ton;
        assert_ne!(a.signing_bytes(), b.signing_bytes());
    }
}
