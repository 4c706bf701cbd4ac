use borsh::{BorshDeserialize, BorshSerialize};

use trinity_types::ledger::LedgerId;
use trinity_types::primitives::{Nonce, OperationId, Timestamp};

use crate::error::StorageError;
use crate::traits::{BatchOp, KvStore};

const NONCE_PREFIX: &[u8] = b"relayer:nonce:";
const CURSOR_PREFIX: &[u8] = b"relayer:cursor:";
const SUBMISSION_PREFIX: &[u8] = b"relayer:submitted:";
const PENDING_PREFIX: &[u8] = b"relayer:pending:";

/// What the relayer remembers about a proof it already handed to the
/// coordinator, so a restart does not resubmit with a fresh nonce.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SubmissionRecord {
    pub nonce: Nonce,
    pub submitted_at: Timestamp,
}

/// A proof the relayer owes: its operation was read from the event log, but
/// no lane has reported on it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingProof {
    pub operation_id: OperationId,
    pub ledger: LedgerId,
    /// Event sequence number the operation was seen at.
    pub seq: u64,
}

/// Durable relayer state: one submission nonce per proof ledger, one event
/// cursor per watcher, a record per (operation, ledger) submission and the
/// proofs still owed.
pub struct RelayerStore<S: KvStore> {
    store: S,
}

fn ledger_key(prefix: &[u8], ledger: LedgerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1);
    key.extend_from_slice(prefix);
    key.push(ledger.as_u8());
    key
}

fn submission_key(operation_id: &OperationId, ledger: LedgerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(SUBMISSION_PREFIX.len() + 33);
    key.extend_from_slice(SUBMISSION_PREFIX);
    key.extend_from_slice(operation_id);
    key.push(ledger.as_u8());
    key
}

fn pending_key(operation_id: &OperationId, ledger: LedgerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(PENDING_PREFIX.len() + 33);
    key.extend_from_slice(PENDING_PREFIX);
    key.extend_from_slice(operation_id);
    key.push(ledger.as_u8());
    key
}

fn decode_pending(key: &[u8], value: &[u8]) -> Result<PendingProof, StorageError> {
    let corrupt = |reason: &str| StorageError::CorruptValue {
        key: String::from_utf8_lossy(PENDING_PREFIX).into_owned(),
        reason: reason.to_string(),
    };
    let rest = key
        .strip_prefix(PENDING_PREFIX)
        .filter(|rest| rest.len() == 33)
        .ok_or_else(|| corrupt("malformed pending key"))?;
    let mut operation_id = [0u8; 32];
    operation_id.copy_from_slice(&rest[..32]);
    let ledger = LedgerId::from_u8(rest[32]).ok_or_else(|| corrupt("unknown ledger"))?;
    Ok(PendingProof {
        operation_id,
        ledger,
        seq: decode_u64(key, value)?,
    })
}

fn decode_u64(key: &[u8], bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StorageError::CorruptValue {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: format!("expected 8 bytes, found {}", bytes.len()),
    })?;
    Ok(u64::from_le_bytes(raw))
}

impl<S: KvStore> RelayerStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Next nonce to use on `ledger`'s lane. Zero if the lane never submitted.
    pub fn next_nonce(&self, ledger: LedgerId) -> Result<Nonce, StorageError> {
        let key = ledger_key(NONCE_PREFIX, ledger);
        match self.store.get(&key)? {
            Some(bytes) => decode_u64(&key, &bytes),
            None => Ok(0),
        }
    }

    /// Overwrite the lane nonce, e.g. after the coordinator reported the value
    /// it expects.
    pub fn set_next_nonce(&self, ledger: LedgerId, nonce: Nonce) -> Result<(), StorageError> {
        self.store
            .put(&ledger_key(NONCE_PREFIX, ledger), &nonce.to_le_bytes())
    }

    /// Atomically consume `record.nonce` and remember the submission.
    pub fn commit_submission(
        &self,
        operation_id: &OperationId,
        ledger: LedgerId,
        record: &SubmissionRecord,
    ) -> Result<(), StorageError> {
        let next = record
            .nonce
            .checked_add(1)
            .ok_or(StorageError::NonceOverflow { ledger })?;
        let key = submission_key(operation_id, ledger);
        let value = borsh::to_vec(record).map_err(|e| StorageError::Encode {
            key: String::from_utf8_lossy(SUBMISSION_PREFIX).into_owned(),
            reason: e.to_string(),
        })?;
        self.store.write_batch(vec![
            BatchOp::Put {
                key: ledger_key(NONCE_PREFIX, ledger),
                value: next.to_le_bytes().to_vec(),
            },
            BatchOp::Put { key, value },
        ])
    }

    pub fn submission(
        &self,
        operation_id: &OperationId,
        ledger: LedgerId,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        let key = submission_key(operation_id, ledger);
        match self.store.get(&key)? {
            Some(bytes) => SubmissionRecord::try_from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::CorruptValue {
                    key: String::from_utf8_lossy(SUBMISSION_PREFIX).into_owned(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Drop the submission records of a finished operation.
    pub fn forget_operation(&self, operation_id: &OperationId) -> Result<(), StorageError> {
        let ops = LedgerId::ALL
            .iter()
            .map(|ledger| BatchOp::Delete {
                key: submission_key(operation_id, *ledger),
            })
            .collect();
        self.store.write_batch(ops)
    }

    /// Last event sequence number the watcher for `ledger` has handled.
    pub fn cursor(&self, ledger: LedgerId) -> Result<Option<u64>, StorageError> {
        let key = ledger_key(CURSOR_PREFIX, ledger);
        self.store
            .get(&key)?
            .map(|bytes| decode_u64(&key, &bytes))
            .transpose()
    }

    pub fn set_cursor(&self, ledger: LedgerId, seq: u64) -> Result<(), StorageError> {
        self.store
            .put(&ledger_key(CURSOR_PREFIX, ledger), &seq.to_le_bytes())
    }

    /// Forget the watcher's position, so it reads the log from the start.
    pub fn clear_cursor(&self, ledger: LedgerId) -> Result<(), StorageError> {
        self.store.delete(&ledger_key(CURSOR_PREFIX, ledger))
    }

    /// Advance the watcher for `ledger` past `seq`, where it saw
    /// `operation_id`, and remember that each of `provers` owes a proof for it.
    /// Both land together, so a crash never loses the operation.
    pub fn record_operation(
        &self,
        ledger: LedgerId,
        seq: u64,
        operation_id: &OperationId,
        provers: &[LedgerId],
    ) -> Result<(), StorageError> {
        let mut ops: Vec<BatchOp> = provers
            .iter()
            .map(|prover| BatchOp::Put {
                key: pending_key(operation_id, *prover),
                value: seq.to_le_bytes().to_vec(),
            })
            .collect();
        ops.push(BatchOp::Put {
            key: ledger_key(CURSOR_PREFIX, ledger),
            value: seq.to_le_bytes().to_vec(),
        });
        self.store.write_batch(ops)
    }

    /// The proof of `ledger` for `operation_id` has a final outcome.
    pub fn complete_proof(&self, operation_id: &OperationId, ledger: LedgerId) -> Result<(), StorageError> {
        self.store.delete(&pending_key(operation_id, ledger))
    }

    /// Proofs recorded but not completed, in key order.
    pub fn pending_proofs(&self) -> Result<Vec<PendingProof>, StorageError> {
        self.store
            .prefix_scan(PENDING_PREFIX)?
            .iter()
            .map(|(key, value)| decode_pending(key, value))
            .collect()
    }

    /// Drop owed proofs and submission records. Used when the coordinator
    /// behind the relayer starts over with an empty state.
    pub fn clear_operations(&self) -> Result<usize, StorageError> {
        let mut ops = Vec::new();
        for prefix in [PENDING_PREFIX, SUBMISSION_PREFIX] {
            for (key, _) in self.store.prefix_scan(prefix)? {
                ops.push(BatchOp::Delete { key });
            }
        }
        let count = ops.len();
        if count > 0 {
            self.store.write_batch(ops)?;
        }
        Ok(count)
    }

    /// Number of submissions still on record, across all operations.
    pub fn pending_submissions(&self) -> Result<usize, StorageError> {
        Ok(self.store.prefix_scan(SUBMISSION_PREFIX)?.len())
    }
}
