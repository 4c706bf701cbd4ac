use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::constants::{CONSENSUS_THRESHOLD, LEDGER_COUNT};
use crate::ledger::LedgerId;
use crate::primitives::*;

/// Lifecycle of an operation.
///
/// `Pending` is initial. `Executed`, `Cancelled` and `Expired` are terminal.
/// `Verified` is only ever observed inside the call that crosses the
/// threshold, which executes the operation before returning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum OperationStatus {
    Pending,
    Verified,
    Executed,
    Cancelled,
    Expired,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Executed | OperationStatus::Cancelled | OperationStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Verified => "verified",
            OperationStatus::Executed => "executed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::Expired => "expired",
        }
    }
}

/// The unit of consensus.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub initiator: Address,
    pub initiator_pubkey: PublicKey,
    pub source_ledger: LedgerId,
    pub destination_ledger: LedgerId,
    /// Optional contract on the destination ledger that consumes the release.
    pub target: Option<Address>,
    pub amount: Amount,
    pub fee: Amount,
    /// Per-initiator sequence number folded into the id.
    pub sequence: u64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: OperationStatus,
    /// Ledgers that supplied a valid proof. One entry per ledger at most.
    pub confirmed_ledgers: BTreeSet<LedgerId>,
}

impl Operation {
    /// Number of distinct ledgers with a valid proof.
    pub fn valid_proof_count(&self) -> usize {
        self.confirmed_ledgers.len()
    }

    /// Consensus is reached with two valid proofs, unless the operation was
    /// cancelled or expired.
    pub fn has_consensus(&self) -> bool {
        self.valid_proof_count() >= CONSENSUS_THRESHOLD
            && !matches!(
                self.status,
                OperationStatus::Cancelled | OperationStatus::Expired
            )
    }

    pub fn is_confirmed_by(&self, ledger: LedgerId) -> bool {
        self.confirmed_ledgers.contains(&ledger)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Check the count invariant. Used by tests and debug assertions.
    pub fn invariants_hold(&self) -> bool {
        self.valid_proof_count() <= LEDGER_COUNT
    }
}

/// Canonical content hashed into an operation id.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OperationFingerprint {
    pub initiator: Address,
    pub source_ledger: LedgerId,
    pub destination_ledger: LedgerId,
    pub target: Option<Address>,
    pub amount: Amount,
    pub sequence: u64,
}

/// A signed request to open a new operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CreateOperationRequest {
    pub initiator: PublicKey,
    pub source_ledger: LedgerId,
    pub destination_ledger: LedgerId,
    pub target: Option<Address>,
    pub amount: Amount,
    /// Requested lifetime in seconds.
    pub duration: u64,
    pub prioritize_speed: bool,
    pub prioritize_security: bool,
    /// Value attached to the request; must cover the priced fee.
    pub paid_value: Amount,
    pub timestamp: Timestamp,
    #[serde(with = "crate::primitives::serde_sig")]
    pub signature: Signature,
}

impl CreateOperationRequest {
    /// Bytes covered by the initiator's signature (all fields but the signature).
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128);
        data.extend_from_slice(b"trinity:create:");
        data.extend_from_slice(&self.initiator);
        data.push(self.source_ledger.as_u8());
        data.push(self.destination_ledger.as_u8());
        match &self.target {
            Some(t) => {
                data.push(1);
                data.extend_from_slice(t);
            }
            None => data.push(0),
        }
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.extend_from_slice(&self.duration.to_le_bytes());
        data.push(self.prioritize_speed as u8);
        data.push(self.prioritize_security as u8);
        data.extend_from_slice(&self.paid_value.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data
    }
}

/// A signed request by the initiator to cancel a pending operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CancelRequest {
    pub operation_id: OperationId,
    pub initiator: PublicKey,
    pub timestamp: Timestamp,
    #[serde(with = "crate::primitives::serde_sig")]
    pub signature: Signature,
}

impl CancelRequest {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(b"trinity:cancel:");
        data.extend_from_slice(&self.operation_id);
        data.extend_from_slice(&self.initiator);
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data
    }
}

/// Refund and penalty computed for a cancelled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    pub refund: Amount,
    pub penalty: Amount,
    /// False when the refund transfer failed and was deferred.
    pub refund_delivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_operation(status: OperationStatus, confirmed: &[LedgerId]) -> Operation {
        Operation {
            id: [1u8; 32],
            initiator: [2u8; 20],
            initiator_pubkey: [3u8; 32],
            source_ledger: LedgerId::Ethereum,
            destination_ledger: LedgerId::Solana,
            target: None,
            amount: 100,
            fee: 1,
            sequence: 0,
            created_at: 1_000,
            expires_at: 2_000,
            status,
            confirmed_ledgers: confirmed.iter().copied().collect(),
        }
    }

    #[test]
    fn test_consensus_needs_two_ledgers() {
        let op = make_operation(OperationStatus::Pending, &[LedgerId::Solana]);
        assert_eq!(op.valid_proof_count(), 1);
        assert!(!op.has_consensus());

        let op = make_operation(
            OperationStatus::Executed,
            &[LedgerId::Solana, LedgerId::Ton],
        );
        assert!(op.has_consensus());
    }

    #[test]
    fn test_cancelled_or_expired_never_has_consensus() {
        let all = LedgerId::ALL;
        assert!(!make_operation(OperationStatus::Cancelled, &all).has_consensus());
        assert!(!make_operation(OperationStatus::Expired, &all).has_consensus());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Verified.is_terminal());
        assert!(OperationStatus::Executed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(OperationStatus::Expired.is_terminal());
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let op = make_operation(OperationStatus::Pending, &[]);
        assert!(!op.is_expired_at(1_999));
        assert!(op.is_expired_at(2_000));
    }

    #[test]
    fn test_signing_bytes_cover_fields() {
        let req = CreateOperationRequest {
            initiator: [1u8; 32],
            source_ledger: LedgerId::Ethereum,
            destination_ledger: LedgerId::Ton,
            target: None,
            amount: 100,
            duration: 3_600,
            prioritize_speed: false,
            prioritize_security: false,
            paid_value: 10,
            timestamp: 5,
            signature: [0u8; 64],
        };
        let mut other = req.clone();
        other.amount = 101;
        assert_ne!(req.signing_bytes(), other.signing_bytes());

        let mut signed = req.clone();
        signed.signature = [9u8; 64];
        assert_eq!(req.signing_bytes(), signed.signing_bytes());
    }
}
