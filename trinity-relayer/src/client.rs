use async_trait::async_trait;

use trinity_types::event::EventRecord;
use trinity_types::ledger::LedgerId;
use trinity_types::operation::Operation;
use trinity_types::primitives::{Amount, Nonce, OperationId, PublicKey};
use trinity_types::proof::{ProofMaterial, ProofReceipt, ProofSubmission};

use crate::error::ClientError;

/// The relayer's view of the coordinator: its event log, its read interface,
/// and the per-ledger transaction path for proofs.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Events with sequence number `>= from`, oldest first.
    async fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>, ClientError>;

    async fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>, ClientError>;

    async fn has_consensus(&self, id: &OperationId) -> Result<bool, ClientError>;

    /// Transaction fee the ledger currently asks for a proof submission.
    async fn estimate_fee(&self, ledger: LedgerId) -> Result<Amount, ClientError>;

    /// Next nonce the ledger will accept from `submitter`.
    async fn account_nonce(&self, ledger: LedgerId, submitter: &PublicKey) -> Result<Nonce, ClientError>;

    async fn submit_proof(&self, submission: ProofSubmission) -> Result<ProofReceipt, ClientError>;
}

/// A ledger's validators, queried for the inclusion proof of an operation.
#[async_trait]
pub trait ProofSource: Send + Sync {
    fn ledger(&self) -> LedgerId;

    async fn fetch_proof(&self, operation_id: &OperationId) -> Result<ProofMaterial, ClientError>;
}
