//! In-process host ledger for the coordinator.
//!
//! Serializes every coordinator call behind one lock, supplies the host
//! timestamp, and plays the transaction layer the relayer submits through:
//! per-sender nonces and a flat submission fee. A submission that reaches the
//! coordinator consumes its nonce whether or not the proof is accepted, like
//! a reverted transaction on a real ledger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use trinity_coordinator::coordinator::{Coordinator, CoordinatorConfig};
use trinity_coordinator::error::{CoordinatorError, ErrorKind};
use trinity_coordinator::payout::LedgerBalances;
use trinity_relayer::client::CoordinatorClient;
use trinity_relayer::error::ClientError;
use trinity_types::breaker::ControllerCommand;
use trinity_types::event::EventRecord;
use trinity_types::ledger::LedgerId;
use trinity_types::operation::{
    CancelRequest, CancellationReceipt, CreateOperationRequest, Operation,
};
use trinity_types::primitives::*;
use trinity_types::proof::{ProofReceipt, ProofSubmission};

use crate::metrics::NodeMetrics;

/// Source of the host timestamp, in unix seconds.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

struct HostState {
    coordinator: Coordinator<LedgerBalances>,
    /// Next accepted nonce per (lane, sender).
    nonces: BTreeMap<(LedgerId, PublicKey), Nonce>,
}

pub struct HostLedger {
    state: RwLock<HostState>,
    submission_fee: Amount,
    clock: Clock,
    metrics: Arc<NodeMetrics>,
}

impl HostLedger {
    pub fn new(
        config: CoordinatorConfig,
        submission_fee: u64,
        clock: Clock,
        metrics: Arc<NodeMetrics>,
    ) -> Result<Self, CoordinatorError> {
        let coordinator = Coordinator::new(config, LedgerBalances::new())?;
        Ok(Self {
            state: RwLock::new(HostState {
                coordinator,
                nonces: BTreeMap::new(),
            }),
            submission_fee: submission_fee as Amount,
            clock,
            metrics,
        })
    }

    pub fn now(&self) -> Timestamp {
        (self.clock)()
    }

    pub async fn create_operation(
        &self,
        request: &CreateOperationRequest,
    ) -> Result<OperationId, CoordinatorError> {
        let now = self.now();
        self.state.write().await.coordinator.create_operation(request, now)
    }

    pub async fn cancel_operation(
        &self,
        request: &CancelRequest,
    ) -> Result<CancellationReceipt, CoordinatorError> {
        let now = self.now();
        self.state.write().await.coordinator.cancel_operation(request, now)
    }

    pub async fn apply_controller_command(
        &self,
        command: &ControllerCommand,
    ) -> Result<(), CoordinatorError> {
        let now = self.now();
        self.state
            .write()
            .await
            .coordinator
            .apply_controller_command(command, now)
    }

    pub async fn claim_epoch_reward(
        &self,
        epoch_id: EpochId,
        submitter: &PublicKey,
    ) -> Result<Amount, CoordinatorError> {
        let now = self.now();
        self.state
            .write()
            .await
            .coordinator
            .claim_epoch_reward(epoch_id, submitter, now)
    }

    pub async fn claim_deferred(&self, recipient: &Address) -> Result<Option<Amount>, CoordinatorError> {
        self.state.write().await.coordinator.claim_deferred(recipient)
    }

    /// Advance the coordinator to the current host time.
    pub async fn tick(&self) -> Result<bool, CoordinatorError> {
        let now = self.now();
        self.state.write().await.coordinator.on_tick(now)
    }

    /// Run `f` against the coordinator under the read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&Coordinator<LedgerBalances>) -> R) -> R {
        f(&self.state.read().await.coordinator)
    }

    /// Run `f` against the coordinator under the write lock.
    pub async fn write<R>(&self, f: impl FnOnce(&mut Coordinator<LedgerBalances>) -> R) -> R {
        f(&mut self.state.write().await.coordinator)
    }

    pub fn submission_fee(&self) -> Amount {
        self.submission_fee
    }
}

fn client_error(e: CoordinatorError) -> ClientError {
    match e.kind() {
        // The breaker closes again on its own; worth retrying later.
        ErrorKind::CircuitBreaker => ClientError::Transient {
            reason: e.to_string(),
        },
        _ => ClientError::Rejected {
            reason: e.to_string(),
        },
    }
}

#[async_trait]
impl CoordinatorClient for HostLedger {
    async fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>, ClientError> {
        Ok(self.state.read().await.coordinator.events_since(from, limit))
    }

    async fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>, ClientError> {
        Ok(self.state.read().await.coordinator.get_operation(id).cloned())
    }

    async fn has_consensus(&self, id: &OperationId) -> Result<bool, ClientError> {
        self.state
            .read()
            .await
            .coordinator
            .has_consensus(id)
            .map_err(client_error)
    }

    async fn estimate_fee(&self, _ledger: LedgerId) -> Result<Amount, ClientError> {
        Ok(self.submission_fee)
    }

    async fn account_nonce(&self, ledger: LedgerId, submitter: &PublicKey) -> Result<Nonce, ClientError> {
        let state = self.state.read().await;
        Ok(state.nonces.get(&(ledger, *submitter)).copied().unwrap_or(0))
    }

    async fn submit_proof(&self, submission: ProofSubmission) -> Result<ProofReceipt, ClientError> {
        let now = self.now();
        let key = (submission.proof.ledger_id, submission.proof.submitter);
        let mut state = self.state.write().await;

        let expected = state.nonces.get(&key).copied().unwrap_or(0);
        if submission.nonce != expected {
            return Err(ClientError::NonceMismatch { expected });
        }
        if submission.fee < self.submission_fee {
            return Err(ClientError::Rejected {
                reason: format!(
                    "fee {} below the submission fee {}",
                    submission.fee, self.submission_fee
                ),
            });
        }
        state.nonces.insert(key, expected + 1);

        match state.coordinator.submit_proof(&submission.proof, now) {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.metrics.proofs_rejected.inc();
                debug!(
                    operation = %short_hex(&submission.proof.operation_id),
                    ledger = %submission.proof.ledger_id,
                    nonce = submission.nonce,
                    error = %e,
                    "submission reverted"
                );
                Err(client_error(e))
            }
        }
    }
}
