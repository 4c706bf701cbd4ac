use thiserror::Error;

use trinity_types::constants::{
    CANCEL_REFUND, MAX_SPLIT_DUST, PROTOCOL_SHARE_PCT, SPEED_MULTIPLIER, VALIDATOR_SHARE_PCT,
};
use trinity_types::network::FeeParams;
use trinity_types::primitives::Amount;

/// Broken fee arithmetic. Always fatal: the coordinator halts rather than
/// continue with balances it cannot account for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountingError {
    #[error("fee split {validator}+{protocol} exceeds fee {fee}")]
    SplitExceedsFee {
        fee: Amount,
        validator: Amount,
        protocol: Amount,
    },

    #[error("fee split of {fee} leaves {dust} dust")]
    SplitDustTooLarge { fee: Amount, dust: Amount },

    #[error("refund {refund} + penalty {penalty} != fee {fee}")]
    RefundMismatch {
        fee: Amount,
        refund: Amount,
        penalty: Amount,
    },

    #[error("reward {reward} x {count} exceeds share {share}")]
    RewardExceedsShare {
        share: Amount,
        reward: Amount,
        count: u64,
    },

    #[error("{what} underflow: {have} < {take}")]
    Underflow {
        what: &'static str,
        have: Amount,
        take: Amount,
    },

    #[error("fees in {collected} != fees accounted {accounted}")]
    ConservationBroken { collected: Amount, accounted: Amount },
}

/// Result of splitting a fee between proof submitters and the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub validator_share: Amount,
    pub protocol_share: Amount,
    /// Rounding remainder, owed to the protocol.
    pub dust: Amount,
}

/// Price an operation.
///
/// fee = base_fee [× 1.5 if speed] [× security multiplier if security],
/// each step rounded down, clamped to `max_fee` and never below one unit.
pub fn price_operation(params: &FeeParams, prioritize_speed: bool, prioritize_security: bool) -> Amount {
    let mut fee = params.base_fee as Amount;
    if prioritize_speed {
        fee = SPEED_MULTIPLIER.apply(fee);
    }
    if prioritize_security {
        fee = params.security_multiplier.apply(fee);
    }
    fee.min(params.max_fee as Amount).max(1)
}

/// Split a fee 80/20, both shares rounded down.
pub fn split_fee(fee: Amount) -> Result<FeeSplit, AccountingError> {
    // fee / 100 * pct + remainder term avoids overflow near u128::MAX.
    let share = |pct: Amount| fee / 100 * pct + fee % 100 * pct / 100;
    let validator_share = share(VALIDATOR_SHARE_PCT);
    let protocol_share = share(PROTOCOL_SHARE_PCT);

    let total = validator_share
        .checked_add(protocol_share)
        .filter(|total| *total <= fee)
        .ok_or(AccountingError::SplitExceedsFee {
            fee,
            validator: validator_share,
            protocol: protocol_share,
        })?;
    let dust = fee - total;
    if dust >= MAX_SPLIT_DUST {
        return Err(AccountingError::SplitDustTooLarge { fee, dust });
    }
    Ok(FeeSplit {
        validator_share,
        protocol_share,
        dust,
    })
}

/// Divide a share equally. Returns `(reward_each, dust)`.
///
/// With no validators the whole share is dust.
pub fn per_validator_reward(
    validator_share: Amount,
    validator_count: u64,
) -> Result<(Amount, Amount), AccountingError> {
    if validator_count == 0 {
        return Ok((0, validator_share));
    }
    let count = validator_count as Amount;
    let reward = validator_share / count;
    let paid = reward
        .checked_mul(count)
        .filter(|paid| *paid <= validator_share)
        .ok_or(AccountingError::RewardExceedsShare {
            share: validator_share,
            reward,
            count: validator_count,
        })?;
    Ok((reward, validator_share - paid))
}

/// Refund 80% of a cancelled operation's fee, rounded down; the penalty is the
/// remainder, so the two always add back to the fee.
///
/// At `fee = 1` the refund truncates to 0 and the whole unit is penalty.
pub fn cancellation_refund(original_fee: Amount) -> Result<(Amount, Amount), AccountingError> {
    let refund = CANCEL_REFUND.apply(original_fee);
    let penalty = original_fee
        .checked_sub(refund)
        .ok_or(AccountingError::RefundMismatch {
            fee: original_fee,
            refund,
            penalty: 0,
        })?;
    if refund.checked_add(penalty) != Some(original_fee) {
        return Err(AccountingError::RefundMismatch {
            fee: original_fee,
            refund,
            penalty,
        });
    }
    Ok((refund, penalty))
}

/// A ledger's proportional part of the validator 80% of an epoch pool.
/// Zero when no proofs were recorded.
pub fn epoch_validator_reward(epoch_pool: Amount, my_proof_count: u64, total_proof_count: u64) -> Amount {
    if total_proof_count == 0 {
        return 0;
    }
    let validator_pool = epoch_pool / 100 * VALIDATOR_SHARE_PCT
        + epoch_pool % 100 * VALIDATOR_SHARE_PCT / 100;
    let mine = my_proof_count.min(total_proof_count) as Amount;
    let total = total_proof_count as Amount;
    match validator_pool.checked_mul(mine) {
        Some(scaled) => scaled / total,
        None => validator_pool / total * mine,
    }
}
