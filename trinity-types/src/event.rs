use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::breaker::TripReason;
use crate::ledger::LedgerId;
use crate::primitives::*;

/// Events emitted by the coordinator, in commit order.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    OperationCreated {
        operation_id: OperationId,
        initiator: Address,
        source_ledger: LedgerId,
        destination_ledger: LedgerId,
        amount: Amount,
    },
    ProofSubmitted {
        operation_id: OperationId,
        ledger_id: LedgerId,
        merkle_root: Hash,
    },
    ConsensusReached {
        operation_id: OperationId,
        valid_proof_count: usize,
    },
    OperationExecuted {
        operation_id: OperationId,
        fee: Amount,
    },
    OperationCancelled {
        operation_id: OperationId,
        refund: Amount,
        penalty: Amount,
    },
    OperationExpired {
        operation_id: OperationId,
    },
    PayoutDeferred {
        recipient: Address,
        amount: Amount,
    },
    CircuitBreakerTripped {
        reason: TripReason,
        cooldown_until: Timestamp,
    },
    CircuitBreakerCleared {
        manual: bool,
    },
    EpochClosed {
        epoch_id: EpochId,
        fee_pool: Amount,
        protocol_share: Amount,
        dust: Amount,
    },
    RewardClaimed {
        epoch_id: EpochId,
        submitter: PublicKey,
        amount: Amount,
    },
}

impl CoordinatorEvent {
    /// The operation this event concerns, if any.
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            CoordinatorEvent::OperationCreated { operation_id, .. }
            | CoordinatorEvent::ProofSubmitted { operation_id, .. }
            | CoordinatorEvent::ConsensusReached { operation_id, .. }
            | CoordinatorEvent::OperationExecuted { operation_id, .. }
            | CoordinatorEvent::OperationCancelled { operation_id, .. }
            | CoordinatorEvent::OperationExpired { operation_id } => Some(operation_id),
            _ => None,
        }
    }
}

/// An event with its position in the coordinator's log.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub event: CoordinatorEvent,
}
