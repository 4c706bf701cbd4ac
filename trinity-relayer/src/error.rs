use thiserror::Error;

use trinity_storage::error::StorageError;
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::Nonce;

/// Errors returned by a coordinator or validator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Network or availability problem; worth retrying.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("call timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// The sender nonce was not the one the ledger expects.
    #[error("nonce mismatch: ledger expects {expected}")]
    NonceMismatch { expected: Nonce },

    /// The call reached the coordinator and was refused.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    #[error("no proof available: {reason}")]
    ProofUnavailable { reason: String },
}

impl ClientError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transient { .. }
                | ClientError::Timeout { .. }
                | ClientError::ProofUnavailable { .. }
        )
    }
}

/// Errors that stop a relayer component.
#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("no relayer key configured for {ledger}")]
    MissingKey { ledger: LedgerId },

    #[error("no proof source configured for {ledger}")]
    MissingSource { ledger: LedgerId },

    /// A downstream task went away.
    #[error("channel closed: {reason}")]
    ChannelClosed { reason: String },
}
