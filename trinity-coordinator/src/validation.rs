use std::collections::{BTreeMap, BTreeSet};

use trinity_crypto::keys::verify;
use trinity_crypto::merkle;
use trinity_types::constants::MAX_TIMESTAMP_DRIFT;
use trinity_types::ledger::LedgerId;
use trinity_types::network::MerkleParams;
use trinity_types::primitives::{Hash, PublicKey, Timestamp};
use trinity_types::proof::ChainProof;

use crate::error::CoordinatorError;

/// Tier-1 binding check: the submitter must be registered for the ledger the
/// proof claims to come from, and must have signed the proof.
pub fn check_binding(
    proof: &ChainProof,
    relayers: &BTreeMap<LedgerId, BTreeSet<PublicKey>>,
) -> Result<(), CoordinatorError> {
    let authorized = relayers
        .get(&proof.ledger_id)
        .is_some_and(|keys| keys.contains(&proof.submitter));
    if !authorized {
        return Err(CoordinatorError::UnauthorizedRelayer {
            ledger: proof.ledger_id,
        });
    }
    verify(
        &proof.signing_bytes(),
        &proof.submitter_signature,
        &proof.submitter,
    )
    .map_err(|_| CoordinatorError::InvalidSignature)
}

/// Reject roots from the future or older than the validity window.
pub fn check_root_freshness(
    proof: &ChainProof,
    now: Timestamp,
    params: &MerkleParams,
) -> Result<(), CoordinatorError> {
    if proof.timestamp > now.saturating_add(MAX_TIMESTAMP_DRIFT) {
        return Err(CoordinatorError::TimestampTooFuture {
            timestamp: proof.timestamp,
            now,
        });
    }
    let age = now.saturating_sub(proof.timestamp);
    if age > params.root_validity {
        return Err(CoordinatorError::StaleMerkleRoot {
            age,
            max: params.root_validity,
        });
    }
    Ok(())
}

/// Recompute the operation's leaf and check it against the proof.
///
/// The caller-supplied leaf, if any, is only compared, never used.
pub fn verify_inclusion(proof: &ChainProof, max_depth: usize) -> Result<Hash, CoordinatorError> {
    if proof.sibling_path.len() > max_depth {
        return Err(CoordinatorError::PathTooLong {
            depth: proof.sibling_path.len(),
            max: max_depth,
        });
    }
    let leaf = merkle::operation_leaf(&proof.operation_id);
    if proof.claimed_leaf.is_some_and(|claimed| claimed != leaf) {
        return Err(CoordinatorError::LeafMismatch);
    }
    if !merkle::verify(&leaf, &proof.sibling_path, &proof.merkle_root, max_depth) {
        return Err(CoordinatorError::InvalidProof);
    }
    Ok(leaf)
}
