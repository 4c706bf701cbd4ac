use thiserror::Error;

use trinity_sentinel::error::SentinelError;
use trinity_types::error::TrinityError;
use trinity_types::ledger::LedgerId;
use trinity_types::operation::OperationStatus;
use trinity_types::primitives::{Amount, EpochId, Timestamp};

use crate::fees::AccountingError;

/// Coarse classification of coordinator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Refused by a rule; nothing changed.
    RejectedByPolicy,
    /// Merkle material failed verification. Feeds the failure-rate detector.
    InvalidProof,
    /// Fee arithmetic broke. The coordinator is halted.
    Accounting,
    /// The circuit breaker is open.
    CircuitBreaker,
    /// A previous accounting failure halted the coordinator.
    Halted,
}

/// Errors returned by the consensus coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    // ─── Operations ──────────────────────────────────────────────────────────
    #[error("unknown operation {id}")]
    UnknownOperation { id: String },

    #[error("operation {id} already exists")]
    DuplicateOperation { id: String },

    #[error("operation is {}", .status.as_str())]
    OperationTerminal { status: OperationStatus },

    #[error("operation expired at {expired_at}")]
    OperationExpired { expired_at: Timestamp },

    #[error("source and destination ledger are both {ledger}")]
    SameLedger { ledger: LedgerId },

    #[error("amount {amount} outside [{min}, {max}]")]
    AmountOutOfBounds { amount: Amount, min: Amount, max: Amount },

    #[error("duration {duration}s outside [{min}, {max}]")]
    DurationOutOfBounds { duration: u64, min: u64, max: u64 },

    #[error("paid {paid} does not cover fee {fee}")]
    InsufficientFee { paid: Amount, fee: Amount },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("caller is not the operation's initiator")]
    NotInitiator,

    #[error("timestamp {timestamp} is too far ahead of {now}")]
    TimestampTooFuture { timestamp: Timestamp, now: Timestamp },

    // ─── Proofs ──────────────────────────────────────────────────────────────
    #[error("submitter is not an authorized relayer for {ledger}")]
    UnauthorizedRelayer { ledger: LedgerId },

    #[error("{ledger} already confirmed this operation")]
    DuplicateLedgerProof { ledger: LedgerId },

    #[error("merkle root is {age}s old, validity is {max}s")]
    StaleMerkleRoot { age: u64, max: u64 },

    #[error("sibling path of {depth} exceeds {max}")]
    PathTooLong { depth: usize, max: usize },

    #[error("claimed leaf does not match the operation")]
    LeafMismatch,

    #[error("merkle proof does not reach the claimed root")]
    InvalidProof,

    // ─── Rewards ─────────────────────────────────────────────────────────────
    #[error("epoch {epoch_id} is not settled")]
    EpochNotSettled { epoch_id: EpochId },

    #[error("nothing to claim in epoch {epoch_id}")]
    NothingToClaim { epoch_id: EpochId },

    #[error("no deferred payout for this recipient")]
    NothingDeferred,

    // ─── Fatal ───────────────────────────────────────────────────────────────
    #[error("accounting violation: {0}")]
    Accounting(#[from] AccountingError),

    #[error("coordinator halted: {reason}")]
    Halted { reason: String },

    #[error(transparent)]
    Sentinel(#[from] SentinelError),

    #[error(transparent)]
    Primitive(#[from] TrinityError),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::PathTooLong { .. }
            | CoordinatorError::LeafMismatch
            | CoordinatorError::InvalidProof => ErrorKind::InvalidProof,
            CoordinatorError::Accounting(_) => ErrorKind::Accounting,
            CoordinatorError::Halted { .. } => ErrorKind::Halted,
            CoordinatorError::Sentinel(
                SentinelError::BreakerActive { .. } | SentinelError::EmergencyPause { .. },
            ) => ErrorKind::CircuitBreaker,
            _ => ErrorKind::RejectedByPolicy,
        }
    }
}
