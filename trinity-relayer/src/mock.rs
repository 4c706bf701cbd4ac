//! In-memory coordinator and validator doubles for relayer tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use trinity_crypto::keys::verify;
use trinity_crypto::merkle::{self, SortedMerkleTree};
use trinity_types::event::{CoordinatorEvent, EventRecord};
use trinity_types::ledger::LedgerId;
use trinity_types::operation::{Operation, OperationStatus};
use trinity_types::primitives::{Amount, Nonce, OperationId, PublicKey};
use trinity_types::proof::{BlockReference, ProofMaterial, ProofReceipt, ProofSubmission};

use crate::client::{CoordinatorClient, ProofSource};
use crate::error::ClientError;

pub(crate) fn make_operation(id: OperationId, source: LedgerId, destination: LedgerId) -> Operation {
    Operation {
        id,
        initiator: [1u8; 20],
        initiator_pubkey: [1u8; 32],
        source_ledger: source,
        destination_ledger: destination,
        target: None,
        amount: 100,
        fee: 1,
        sequence: 0,
        created_at: 1_000,
        expires_at: 10_000,
        status: OperationStatus::Pending,
        confirmed_ledgers: BTreeSet::new(),
    }
}

#[derive(Default)]
pub(crate) struct MockState {
    pub events: Vec<EventRecord>,
    pub operations: HashMap<OperationId, Operation>,
    pub nonces: BTreeMap<LedgerId, Nonce>,
    pub submissions: Vec<ProofSubmission>,
    /// Submissions to fail with a transient error before accepting any.
    pub transient_failures: u32,
    pub fee: Amount,
}

#[derive(Default)]
pub(crate) struct MockCoordinator {
    state: Mutex<MockState>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        let coordinator = Self::default();
        coordinator.state().fee = 100;
        coordinator
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Register a pending operation and log its creation event.
    pub fn add_operation(&self, id: OperationId, source: LedgerId) -> Operation {
        let destination = source.others()[0];
        let operation = make_operation(id, source, destination);
        let mut state = self.state();
        let seq = state.events.len() as u64;
        state.events.push(EventRecord {
            seq,
            timestamp: 1_000,
            event: CoordinatorEvent::OperationCreated {
                operation_id: id,
                initiator: operation.initiator,
                source_ledger: source,
                destination_ledger: destination,
                amount: operation.amount,
            },
        });
        state.operations.insert(id, operation.clone());
        operation
    }
}

#[async_trait]
impl CoordinatorClient for MockCoordinator {
    async fn events_since(&self, from: u64, limit: usize) -> Result<Vec<EventRecord>, ClientError> {
        Ok(self
            .state()
            .events
            .iter()
            .filter(|r| r.seq >= from)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_operation(&self, id: &OperationId) -> Result<Option<Operation>, ClientError> {
        Ok(self.state().operations.get(id).cloned())
    }

    async fn has_consensus(&self, id: &OperationId) -> Result<bool, ClientError> {
        Ok(self
            .state()
            .operations
            .get(id)
            .is_some_and(|op| op.has_consensus()))
    }

    async fn estimate_fee(&self, _ledger: LedgerId) -> Result<Amount, ClientError> {
        Ok(self.state().fee)
    }

    async fn account_nonce(&self, ledger: LedgerId, _submitter: &PublicKey) -> Result<Nonce, ClientError> {
        Ok(self.state().nonces.get(&ledger).copied().unwrap_or(0))
    }

    async fn submit_proof(&self, submission: ProofSubmission) -> Result<ProofReceipt, ClientError> {
        let mut state = self.state();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(ClientError::Transient {
                reason: "connection reset".into(),
            });
        }
        let proof = &submission.proof;
        let expected = state.nonces.get(&proof.ledger_id).copied().unwrap_or(0);
        if submission.nonce != expected {
            return Err(ClientError::NonceMismatch { expected });
        }
        if verify(&proof.signing_bytes(), &proof.submitter_signature, &proof.submitter).is_err() {
            return Err(ClientError::Rejected {
                reason: "bad signature".into(),
            });
        }
        let operation = state
            .operations
            .get_mut(&proof.operation_id)
            .ok_or_else(|| ClientError::Rejected {
                reason: "unknown operation".into(),
            })?;
        if !operation.confirmed_ledgers.insert(proof.ledger_id) {
            return Err(ClientError::Rejected {
                reason: "duplicate ledger proof".into(),
            });
        }
        let executed = operation.status == OperationStatus::Pending && operation.has_consensus();
        if executed {
            operation.status = OperationStatus::Executed;
        }
        let receipt = ProofReceipt {
            valid_proof_count: operation.valid_proof_count(),
            status: operation.status,
            executed,
        };
        state.nonces.insert(proof.ledger_id, expected + 1);
        state.submissions.push(submission);
        Ok(receipt)
    }
}

/// A validator set that proves every operation it is asked about.
pub(crate) struct MockSource {
    ledger: LedgerId,
    delay: Option<Duration>,
    failures: AtomicU32,
}

impl MockSource {
    pub fn new(ledger: LedgerId) -> Self {
        Self {
            ledger,
            delay: None,
            failures: AtomicU32::new(0),
        }
    }

    /// Fails `failures` times before answering.
    pub fn flaky(ledger: LedgerId, failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::new(ledger)
        }
    }

    pub fn slow(ledger: LedgerId, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(ledger)
        }
    }
}

#[async_trait]
impl ProofSource for MockSource {
    fn ledger(&self) -> LedgerId {
        self.ledger
    }

    async fn fetch_proof(&self, operation_id: &OperationId) -> Result<ProofMaterial, ClientError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClientError::Transient {
                reason: "validator unavailable".into(),
            });
        }
        let tree = SortedMerkleTree::from_leaves(vec![
            merkle::operation_leaf(operation_id),
            [self.ledger.as_u8(); 32],
        ]);
        Ok(ProofMaterial {
            merkle_root: tree.root(),
            sibling_path: tree.proof(0).map_err(|e| ClientError::ProofUnavailable {
                reason: e.to_string(),
            })?,
            block_reference: BlockReference::default(),
            root_timestamp: 1_000,
        })
    }
}
