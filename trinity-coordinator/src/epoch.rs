use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use trinity_types::epoch::{EpochSettlement, FeeEpoch};
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::{Amount, EpochId, PublicKey, Timestamp};

use crate::error::CoordinatorError;
use crate::fees::{self, AccountingError};

/// Fee epochs: the open one collecting fees and proof counts, and the closed
/// ones whose settlements are being claimed.
pub struct EpochBook {
    duration: u64,
    current: FeeEpoch,
    closed: BTreeMap<EpochId, FeeEpoch>,
    /// Protocol share, dust and cancellation penalties.
    protocol_pool: Amount,
    /// Settled but not yet claimed rewards, across closed epochs.
    outstanding_rewards: Amount,
    rewards_claimed: Amount,
}

impl EpochBook {
    pub fn new(started_at: Timestamp, duration: u64) -> Self {
        Self {
            duration,
            current: FeeEpoch::new(0, started_at, duration),
            closed: BTreeMap::new(),
            protocol_pool: 0,
            outstanding_rewards: 0,
            rewards_claimed: 0,
        }
    }

    pub fn current(&self) -> &FeeEpoch {
        &self.current
    }

    pub fn epoch(&self, epoch_id: EpochId) -> Option<&FeeEpoch> {
        if epoch_id == self.current.epoch_id {
            return Some(&self.current);
        }
        self.closed.get(&epoch_id)
    }

    pub fn protocol_pool(&self) -> Amount {
        self.protocol_pool
    }

    pub fn outstanding_rewards(&self) -> Amount {
        self.outstanding_rewards
    }

    pub fn rewards_claimed(&self) -> Amount {
        self.rewards_claimed
    }

    /// Everything the book holds or has paid out, for the conservation audit.
    pub fn accounted(&self) -> Amount {
        self.current.fee_pool + self.protocol_pool + self.outstanding_rewards + self.rewards_claimed
    }

    /// Add an executed operation's fee to the open epoch.
    pub fn record_fee(&mut self, fee: Amount) {
        self.current.fee_pool += fee;
    }

    /// Count an accepted proof for `ledger` by `submitter`.
    pub fn record_proof(&mut self, ledger: LedgerId, submitter: PublicKey) {
        *self.current.proof_count_by_ledger.entry(ledger).or_insert(0) += 1;
        self.current.total_proof_count += 1;
        self.current
            .submitters_by_ledger
            .entry(ledger)
            .or_default()
            .insert(submitter);
    }

    pub fn credit_protocol(&mut self, amount: Amount) {
        self.protocol_pool += amount;
    }

    /// Close the open epoch if its window has elapsed and open the next one on
    /// the last window boundary at or before `now`, so epoch edges stay at
    /// `genesis + k * duration`. Idle windows in between are not opened.
    /// Returns the settled epoch.
    pub fn roll_if_due(&mut self, now: Timestamp) -> Result<Option<&FeeEpoch>, AccountingError> {
        if now < self.current.ends_at {
            return Ok(None);
        }
        let boundary = self.current.ends_at;
        let window = self.duration.max(1);
        let started_at = boundary + (now - boundary) / window * window;
        let next = FeeEpoch::new(self.current.epoch_id + 1, started_at, self.duration);
        let mut finished = std::mem::replace(&mut self.current, next);

        let settlement = settle(&finished)?;
        self.protocol_pool += settlement.protocol_share + settlement.dust;
        self.outstanding_rewards += settlement.total_rewards();
        finished.distributed = settlement.rewards.is_empty();
        finished.settlement = Some(settlement);

        info!(
            epoch = finished.epoch_id,
            fee_pool = %finished.fee_pool,
            proofs = finished.total_proof_count,
            "fee epoch closed"
        );
        let epoch_id = finished.epoch_id;
        self.closed.insert(epoch_id, finished);
        Ok(self.closed.get(&epoch_id))
    }

    /// Mark `submitter`'s reward in a closed epoch as claimed and return it.
    pub fn claim(&mut self, epoch_id: EpochId, submitter: &PublicKey) -> Result<Amount, CoordinatorError> {
        let epoch = self
            .closed
            .get_mut(&epoch_id)
            .ok_or(CoordinatorError::EpochNotSettled { epoch_id })?;
        let settlement = epoch
            .settlement
            .as_mut()
            .ok_or(CoordinatorError::EpochNotSettled { epoch_id })?;
        let amount = match settlement.rewards.get(submitter) {
            Some(amount) if !settlement.claimed.contains(submitter) => *amount,
            _ => return Err(CoordinatorError::NothingToClaim { epoch_id }),
        };
        let remaining = self
            .outstanding_rewards
            .checked_sub(amount)
            .ok_or(AccountingError::Underflow {
                what: "outstanding rewards",
                have: self.outstanding_rewards,
                take: amount,
            })?;

        settlement.claimed.insert(*submitter);
        epoch.distributed = settlement.fully_claimed();
        self.outstanding_rewards = remaining;
        self.rewards_claimed += amount;
        Ok(amount)
    }
}

/// Freeze an epoch's distribution.
///
/// The protocol takes its 20% plus split dust. Each ledger gets its
/// proportional part of the 80%, divided equally among that ledger's
/// submitters. Every rounding remainder goes to the protocol.
pub fn settle(epoch: &FeeEpoch) -> Result<EpochSettlement, AccountingError> {
    let split = fees::split_fee(epoch.fee_pool)?;
    let mut dust = split.dust;
    let mut rewards: BTreeMap<PublicKey, Amount> = BTreeMap::new();
    let mut distributed: Amount = 0;

    for (ledger, count) in &epoch.proof_count_by_ledger {
        let ledger_reward =
            fees::epoch_validator_reward(epoch.fee_pool, *count, epoch.total_proof_count);
        let submitters = epoch
            .submitters_by_ledger
            .get(ledger)
            .cloned()
            .unwrap_or_default();
        let (each, ledger_dust) = fees::per_validator_reward(ledger_reward, submitters.len() as u64)?;
        for submitter in submitters {
            *rewards.entry(submitter).or_insert(0) += each;
        }
        dust += ledger_dust;
        distributed += ledger_reward;
    }

    let undistributed = split
        .validator_share
        .checked_sub(distributed)
        .ok_or(AccountingError::Underflow {
            what: "validator share",
            have: split.validator_share,
            take: distributed,
        })?;
    dust += undistributed;

    let settlement = EpochSettlement {
        validator_share: split.validator_share,
        protocol_share: split.protocol_share,
        dust,
        rewards: rewards.into_iter().filter(|(_, r)| *r > 0).collect(),
        claimed: BTreeSet::new(),
    };
    let accounted = settlement.protocol_share + settlement.dust + settlement.total_rewards();
    if accounted != epoch.fee_pool {
        return Err(AccountingError::ConservationBroken {
            collected: epoch.fee_pool,
            accounted,
        });
    }
    Ok(settlement)
}
