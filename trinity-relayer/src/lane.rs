use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use trinity_crypto::keys::Keypair;
use trinity_storage::relayer_store::{RelayerStore, SubmissionRecord};
use trinity_storage::traits::KvStore;
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::{short_hex, Nonce, OperationId, PublicKey, Timestamp};
use trinity_types::proof::{ChainProof, ProofReceipt, ProofSubmission};

use crate::client::CoordinatorClient;
use crate::config::RelayerConfig;
use crate::error::{ClientError, RelayerError};

/// Consecutive nonce corrections tolerated for a single proof.
const MAX_NONCE_RESYNCS: u32 = 3;

/// What happened to one proof handed to a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Submitted {
        operation_id: OperationId,
        ledger: LedgerId,
        nonce: Nonce,
        receipt: ProofReceipt,
    },
    /// The coordinator already holds this ledger's proof.
    AlreadyConfirmed {
        operation_id: OperationId,
        ledger: LedgerId,
    },
    /// The proof is no longer useful (consensus reached, operation closed).
    Skipped {
        operation_id: OperationId,
        ledger: LedgerId,
        reason: String,
    },
    Failed {
        operation_id: OperationId,
        ledger: LedgerId,
        attempts: u32,
        error: String,
    },
}

impl RelayOutcome {
    pub fn operation_id(&self) -> &OperationId {
        match self {
            RelayOutcome::Submitted { operation_id, .. }
            | RelayOutcome::AlreadyConfirmed { operation_id, .. }
            | RelayOutcome::Skipped { operation_id, .. }
            | RelayOutcome::Failed { operation_id, .. } => operation_id,
        }
    }

    pub fn ledger(&self) -> LedgerId {
        match self {
            RelayOutcome::Submitted { ledger, .. }
            | RelayOutcome::AlreadyConfirmed { ledger, .. }
            | RelayOutcome::Skipped { ledger, .. }
            | RelayOutcome::Failed { ledger, .. } => *ledger,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Submitted { .. } => "submitted",
            RelayOutcome::AlreadyConfirmed { .. } => "already_confirmed",
            RelayOutcome::Skipped { .. } => "skipped",
            RelayOutcome::Failed { .. } => "failed",
        }
    }
}

fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serialized submission path for one ledger.
///
/// A ledger's nonce is a strictly increasing per-sender counter, so a lane
/// handles one proof at a time. Before every attempt it consults its own
/// submission records and then asks the coordinator whether the proof is
/// still needed; those checks, not a lock, keep a retried or restarted lane
/// from double submitting.
pub struct SubmissionLane<C, S: KvStore> {
    ledger: LedgerId,
    client: Arc<C>,
    store: Arc<RelayerStore<S>>,
    keypair: Keypair,
    config: RelayerConfig,
}

impl<C: CoordinatorClient, S: KvStore> SubmissionLane<C, S> {
    pub fn new(
        ledger: LedgerId,
        client: Arc<C>,
        store: Arc<RelayerStore<S>>,
        keypair: Keypair,
        config: RelayerConfig,
    ) -> Self {
        Self {
            ledger,
            client,
            store,
            keypair,
            config,
        }
    }

    pub fn ledger(&self) -> LedgerId {
        self.ledger
    }

    pub fn submitter(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Adopt the ledger's account nonce if it differs from the stored one.
    pub async fn sync_nonce(&self) -> Result<Nonce, RelayerError> {
        let stored = self.store.next_nonce(self.ledger)?;
        let remote = self
            .client
            .account_nonce(self.ledger, &self.submitter())
            .await?;
        if remote != stored {
            warn!(
                ledger = %self.ledger,
                stored,
                remote,
                "stored nonce out of date, adopting ledger value"
            );
            self.store.set_next_nonce(self.ledger, remote)?;
        }
        Ok(remote)
    }

    /// Drain `proofs` until every sender is gone, reporting each outcome.
    pub async fn run(
        self,
        mut proofs: mpsc::Receiver<ChainProof>,
        outcomes: mpsc::Sender<RelayOutcome>,
    ) {
        if let Err(e) = self.sync_nonce().await {
            warn!(ledger = %self.ledger, error = %e, "nonce sync failed, using stored nonce");
        }
        info!(ledger = %self.ledger, submitter = %short_hex(&self.submitter()), "submission lane started");
        while let Some(proof) = proofs.recv().await {
            let outcome = self.relay(proof).await;
            if let Err(e) = self.store.complete_proof(outcome.operation_id(), self.ledger) {
                warn!(ledger = %self.ledger, error = %e, "failed to clear owed proof");
            }
            if outcomes.send(outcome).await.is_err() {
                debug!(ledger = %self.ledger, "outcome receiver dropped");
            }
        }
        debug!(ledger = %self.ledger, "submission lane stopped");
    }

    /// Sign and submit one proof, retrying transient failures with backoff.
    pub async fn relay(&self, mut proof: ChainProof) -> RelayOutcome {
        let id = proof.operation_id;
        proof.ledger_id = self.ledger;
        proof.submitter = self.submitter();
        proof.submitter_signature = self.keypair.sign(&proof.signing_bytes());

        let mut failures = 0u32;
        let mut resyncs = 0u32;
        loop {
            let attempt = match self.still_needed(&id).await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => self.submit_once(&proof).await,
                Err(e) => Err(e),
            };
            let err = match attempt {
                Ok(outcome) => return outcome,
                Err(e) => e,
            };

            match err {
                RelayerError::Client(ClientError::NonceMismatch { expected })
                    if resyncs < MAX_NONCE_RESYNCS =>
                {
                    resyncs += 1;
                    warn!(
                        ledger = %self.ledger,
                        operation = %short_hex(&id),
                        expected,
                        "nonce rejected, adopting ledger value"
                    );
                    if let Err(e) = self.store.set_next_nonce(self.ledger, expected) {
                        return self.fail(&id, failures + 1, e.to_string());
                    }
                }
                RelayerError::Client(e) if e.is_transient() => {
                    failures += 1;
                    if !self.config.retry.allows(failures) {
                        return self.fail(&id, failures, e.to_string());
                    }
                    let delay = self.config.retry.delay_for_attempt(failures - 1);
                    debug!(
                        ledger = %self.ledger,
                        operation = %short_hex(&id),
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "submission failed, retrying"
                    );
                    sleep(delay).await;
                }
                RelayerError::Client(ClientError::Rejected { reason }) => {
                    // Another relayer may have landed the same proof first.
                    if let Ok(Some(outcome)) = self.still_needed(&id).await {
                        return outcome;
                    }
                    return self.fail(&id, failures + 1, reason);
                }
                other => return self.fail(&id, failures + 1, other.to_string()),
            }
        }
    }

    /// `Some(outcome)` when the proof should not be submitted.
    async fn still_needed(&self, id: &OperationId) -> Result<Option<RelayOutcome>, RelayerError> {
        if let Some(record) = self.store.submission(id, self.ledger)? {
            debug!(
                ledger = %self.ledger,
                operation = %short_hex(id),
                nonce = record.nonce,
                "submission on record, skipping"
            );
            return Ok(Some(RelayOutcome::AlreadyConfirmed {
                operation_id: *id,
                ledger: self.ledger,
            }));
        }
        let Some(operation) = self.client.get_operation(id).await? else {
            return Ok(Some(self.skip(id, "unknown operation".to_string())));
        };
        if operation.is_confirmed_by(self.ledger) {
            debug!(
                ledger = %self.ledger,
                operation = %short_hex(id),
                "proof already on record, skipping"
            );
            return Ok(Some(RelayOutcome::AlreadyConfirmed {
                operation_id: *id,
                ledger: self.ledger,
            }));
        }
        if self.client.has_consensus(id).await? {
            return Ok(Some(self.skip(id, "consensus already reached".to_string())));
        }
        if operation.status.is_terminal() {
            return Ok(Some(
                self.skip(id, format!("operation {}", operation.status.as_str())),
            ));
        }
        Ok(None)
    }

    async fn submit_once(&self, proof: &ChainProof) -> Result<RelayOutcome, RelayerError> {
        let nonce = self.store.next_nonce(self.ledger)?;
        let estimate = self.client.estimate_fee(self.ledger).await?;
        let fee = estimate.saturating_add(self.config.fee_margin.apply(estimate));
        let submission = ProofSubmission {
            proof: proof.clone(),
            nonce,
            fee,
        };

        let receipt = timeout(
            self.config.submit_timeout(),
            self.client.submit_proof(submission),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            ms: self.config.submit_timeout_ms,
        })??;

        self.store.commit_submission(
            &proof.operation_id,
            self.ledger,
            &SubmissionRecord {
                nonce,
                submitted_at: unix_now(),
            },
        )?;
        info!(
            ledger = %self.ledger,
            operation = %short_hex(&proof.operation_id),
            nonce,
            fee = %fee,
            count = receipt.valid_proof_count,
            executed = receipt.executed,
            "proof submitted"
        );
        Ok(RelayOutcome::Submitted {
            operation_id: proof.operation_id,
            ledger: self.ledger,
            nonce,
            receipt,
        })
    }

    fn skip(&self, id: &OperationId, reason: String) -> RelayOutcome {
        debug!(ledger = %self.ledger, operation = %short_hex(id), %reason, "proof not needed");
        RelayOutcome::Skipped {
            operation_id: *id,
            ledger: self.ledger,
            reason,
        }
    }

    fn fail(&self, id: &OperationId, attempts: u32, error: String) -> RelayOutcome {
        error!(
            ledger = %self.ledger,
            operation = %short_hex(id),
            attempts,
            %error,
            "relay failed, operator attention required"
        );
        RelayOutcome::Failed {
            operation_id: *id,
            ledger: self.ledger,
            attempts,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCoordinator, MockSource};
    use crate::client::ProofSource;
    use crate::retry::RetryPolicy;
    use trinity_storage::memory::MemoryStore;
    use trinity_types::operation::OperationStatus;

    const OP: OperationId = [7u8; 32];

    struct Fixture {
        coordinator: Arc<MockCoordinator>,
        store: Arc<RelayerStore<MemoryStore>>,
        lane: SubmissionLane<MockCoordinator, MemoryStore>,
    }

    fn fixture(retry: RetryPolicy) -> Fixture {
        let coordinator = Arc::new(MockCoordinator::new());
        coordinator.add_operation(OP, LedgerId::Ethereum);
        let store = Arc::new(RelayerStore::new(MemoryStore::new()));
        let config = RelayerConfig {
            retry,
            ..RelayerConfig::default()
        };
        let lane = SubmissionLane::new(
            LedgerId::Solana,
            coordinator.clone(),
            store.clone(),
            Keypair::from_seed(&[9u8; 32]),
            config,
        );
        Fixture {
            coordinator,
            store,
            lane,
        }
    }

    async fn proof_for(ledger: LedgerId) -> ChainProof {
        let material = MockSource::new(ledger).fetch_proof(&OP).await.unwrap();
        ChainProof::from_material(OP, ledger, material, [0u8; 32])
    }

    #[tokio::test]
    async fn test_submits_with_stored_nonce_and_margin() {
        let f = fixture(RetryPolicy::default());
        f.store.set_next_nonce(LedgerId::Solana, 4).unwrap();
        f.coordinator.state().nonces.insert(LedgerId::Solana, 4);

        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert!(matches!(
            outcome,
            RelayOutcome::Submitted {
                nonce: 4,
                ledger: LedgerId::Solana,
                ..
            }
        ));
        assert_eq!(f.store.next_nonce(LedgerId::Solana).unwrap(), 5);
        assert!(f.store.submission(&OP, LedgerId::Solana).unwrap().is_some());

        let state = f.coordinator.state();
        assert_eq!(state.submissions.len(), 1);
        // 100 estimated plus the default 10% margin.
        assert_eq!(state.submissions[0].fee, 110);
        assert_eq!(state.submissions[0].proof.submitter, f.lane.submitter());
    }

    #[tokio::test]
    async fn test_nonce_mismatch_adopts_ledger_value() {
        let f = fixture(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });
        f.coordinator.state().nonces.insert(LedgerId::Solana, 7);

        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert!(matches!(outcome, RelayOutcome::Submitted { nonce: 7, .. }));
        assert_eq!(f.store.next_nonce(LedgerId::Solana).unwrap(), 8);
    }

    #[tokio::test]
    async fn test_sync_nonce_on_start() {
        let f = fixture(RetryPolicy::default());
        f.coordinator.state().nonces.insert(LedgerId::Solana, 12);
        assert_eq!(f.lane.sync_nonce().await.unwrap(), 12);
        assert_eq!(f.store.next_nonce(LedgerId::Solana).unwrap(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let f = fixture(RetryPolicy::default());
        f.coordinator.state().transient_failures = 2;

        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert!(matches!(outcome, RelayOutcome::Submitted { nonce: 0, .. }));
        assert_eq!(f.coordinator.state().submissions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bounded_attempts() {
        let f = fixture(RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 100,
        });
        f.coordinator.state().transient_failures = 100;

        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert!(matches!(outcome, RelayOutcome::Failed { attempts: 3, .. }));
        assert_eq!(f.coordinator.state().transient_failures, 97);
        assert_eq!(f.store.next_nonce(LedgerId::Solana).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_proof_is_not_resubmitted() {
        let f = fixture(RetryPolicy::default());
        f.coordinator
            .state()
            .operations
            .get_mut(&OP)
            .unwrap()
            .confirmed_ledgers
            .insert(LedgerId::Solana);

        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert_eq!(
            outcome,
            RelayOutcome::AlreadyConfirmed {
                operation_id: OP,
                ledger: LedgerId::Solana
            }
        );
        assert!(f.coordinator.state().submissions.is_empty());
    }

    #[tokio::test]
    async fn test_recorded_submission_is_not_resubmitted() {
        let f = fixture(RetryPolicy::default());
        f.store
            .commit_submission(
                &OP,
                LedgerId::Solana,
                &SubmissionRecord {
                    nonce: 0,
                    submitted_at: 1_000,
                },
            )
            .unwrap();

        // The coordinator has not caught up yet; the lane still holds back.
        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert_eq!(outcome.label(), "already_confirmed");
        assert!(f.coordinator.state().submissions.is_empty());
        assert_eq!(f.store.next_nonce(LedgerId::Solana).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_clears_owed_proof() {
        let f = fixture(RetryPolicy::default());
        f.store
            .record_operation(LedgerId::Ethereum, 0, &OP, &LedgerId::Ethereum.others())
            .unwrap();
        let (proof_tx, proof_rx) = mpsc::channel(4);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(4);
        proof_tx.send(proof_for(LedgerId::Solana).await).await.unwrap();
        drop(proof_tx);

        f.lane.run(proof_rx, outcome_tx).await;
        assert_eq!(outcome_rx.recv().await.unwrap().label(), "submitted");
        let owed: Vec<LedgerId> = f.store.pending_proofs().unwrap().iter().map(|p| p.ledger).collect();
        assert_eq!(owed, vec![LedgerId::Ton]);
    }

    #[tokio::test]
    async fn test_skips_once_consensus_is_reached() {
        let f = fixture(RetryPolicy::default());
        {
            let mut state = f.coordinator.state();
            let operation = state.operations.get_mut(&OP).unwrap();
            operation.confirmed_ledgers.insert(LedgerId::Ethereum);
            operation.confirmed_ledgers.insert(LedgerId::Ton);
            operation.status = OperationStatus::Executed;
        }
        let outcome = f.lane.relay(proof_for(LedgerId::Solana).await).await;
        assert_eq!(outcome.label(), "skipped");
        assert!(f.coordinator.state().submissions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_operation_is_skipped() {
        let f = fixture(RetryPolicy::default());
        let material = MockSource::new(LedgerId::Solana)
            .fetch_proof(&[8u8; 32])
            .await
            .unwrap();
        let proof = ChainProof::from_material([8u8; 32], LedgerId::Solana, material, [0u8; 32]);
        let outcome = f.lane.relay(proof).await;
        assert_eq!(outcome.label(), "skipped");
        assert_eq!(outcome.operation_id(), &[8u8; 32]);
    }
}
