use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerId;
use crate::primitives::*;

/// Accounting window for pull-based reward distribution.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FeeEpoch {
    pub epoch_id: EpochId,
    pub started_at: Timestamp,
    pub ends_at: Timestamp,
    /// Gross fees of operations executed during the epoch.
    pub fee_pool: Amount,
    pub proof_count_by_ledger: BTreeMap<LedgerId, u64>,
    pub total_proof_count: u64,
    /// Submitters that contributed accepted proofs, per ledger.
    pub submitters_by_ledger: BTreeMap<LedgerId, BTreeSet<PublicKey>>,
    /// Set once every settled reward has been claimed.
    pub distributed: bool,
    /// Present once the epoch is closed; the epoch is read-only from then on.
    pub settlement: Option<EpochSettlement>,
}

impl FeeEpoch {
    pub fn new(epoch_id: EpochId, started_at: Timestamp, duration: u64) -> Self {
        Self {
            epoch_id,
            started_at,
            ends_at: started_at.saturating_add(duration),
            fee_pool: 0,
            proof_count_by_ledger: BTreeMap::new(),
            total_proof_count: 0,
            submitters_by_ledger: BTreeMap::new(),
            distributed: false,
            settlement: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.settlement.is_some()
    }

    pub fn proof_count(&self, ledger: LedgerId) -> u64 {
        self.proof_count_by_ledger.get(&ledger).copied().unwrap_or(0)
    }
}

/// Frozen outcome of a closed epoch.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EpochSettlement {
    pub validator_share: Amount,
    pub protocol_share: Amount,
    /// Rounding remainders from every division, credited to the protocol.
    pub dust: Amount,
    /// Reward owed to each submitter.
    pub rewards: BTreeMap<PublicKey, Amount>,
    pub claimed: BTreeSet<PublicKey>,
}

impl EpochSettlement {
    pub fn total_rewards(&self) -> Amount {
        self.rewards.values().sum()
    }

    pub fn fully_claimed(&self) -> bool {
        self.rewards.keys().all(|k| self.claimed.contains(k))
    }
}
