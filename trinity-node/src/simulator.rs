//! Simulated ledger validators for dev nodes.
//!
//! Each validator commits the leaves of the operations it is asked about into
//! a new block on its ledger and answers with the inclusion path. There is no
//! real chain behind it: a dev node proves operations against itself.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use trinity_crypto::hash::keccak256_multi;
use trinity_crypto::merkle::{self, SortedMerkleTree};
use trinity_relayer::client::{CoordinatorClient, ProofSource};
use trinity_relayer::error::ClientError;
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::{short_hex, Hash, OperationId};
use trinity_types::proof::{BlockReference, ProofMaterial};

use crate::host::HostLedger;

/// Leaves kept in the simulated ledger's commitment window.
const WINDOW: usize = 256;

struct Chain {
    height: u64,
    leaves: VecDeque<Hash>,
}

pub struct SimulatedValidator {
    ledger: LedgerId,
    host: Arc<HostLedger>,
    chain: Mutex<Chain>,
}

impl SimulatedValidator {
    pub fn new(ledger: LedgerId, host: Arc<HostLedger>) -> Self {
        Self {
            ledger,
            host,
            chain: Mutex::new(Chain {
                height: 0,
                leaves: VecDeque::new(),
            }),
        }
    }

    /// One validator per ledger, all observing the same host.
    pub fn all(host: &Arc<HostLedger>) -> Vec<Arc<dyn ProofSource>> {
        LedgerId::ALL
            .iter()
            .map(|ledger| Arc::new(Self::new(*ledger, host.clone())) as Arc<dyn ProofSource>)
            .collect()
    }
}

#[async_trait]
impl ProofSource for SimulatedValidator {
    fn ledger(&self) -> LedgerId {
        self.ledger
    }

    async fn fetch_proof(&self, operation_id: &OperationId) -> Result<ProofMaterial, ClientError> {
        if self.host.get_operation(operation_id).await?.is_none() {
            return Err(ClientError::ProofUnavailable {
                reason: format!("{} has not seen {}", self.ledger, short_hex(operation_id)),
            });
        }

        let leaf = merkle::operation_leaf(operation_id);
        let mut chain = self.chain.lock().await;
        if !chain.leaves.contains(&leaf) {
            if chain.leaves.len() == WINDOW {
                chain.leaves.pop_front();
            }
            chain.leaves.push_back(leaf);
        }
        chain.height += 1;

        let leaves: Vec<Hash> = chain.leaves.iter().copied().collect();
        let index = leaves
            .iter()
            .position(|l| *l == leaf)
            .ok_or_else(|| ClientError::ProofUnavailable {
                reason: "leaf left the commitment window".into(),
            })?;
        let tree = SortedMerkleTree::from_leaves(leaves);
        let sibling_path = tree.proof(index).map_err(|e| ClientError::ProofUnavailable {
            reason: e.to_string(),
        })?;
        let root = tree.root();
        let block_hash = keccak256_multi(&[
            &[self.ledger.as_u8()],
            &chain.height.to_le_bytes(),
            &root,
        ]);

        debug!(
            ledger = %self.ledger,
            height = chain.height,
            operation = %short_hex(operation_id),
            "committed operation leaf"
        );
        Ok(ProofMaterial {
            merkle_root: root,
            sibling_path,
            block_reference: BlockReference {
                number: chain.height,
                hash: block_hash,
            },
            root_timestamp: self.host.now(),
        })
    }
}
