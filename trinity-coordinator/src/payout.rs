use std::collections::{BTreeMap, BTreeSet};

use trinity_types::primitives::{Address, Amount};

/// Non-reverting value transfer to an end user or submitter.
///
/// `try_transfer` reports failure instead of aborting, so a recipient that
/// refuses funds can never block a state transition.
pub trait PayoutSink: Send + Sync {
    fn try_transfer(&mut self, recipient: &Address, amount: Amount) -> bool;
}

/// In-process balances, used by the dev node and tests.
#[derive(Debug, Default)]
pub struct LedgerBalances {
    balances: BTreeMap<Address, Amount>,
    refusing: BTreeSet<Address>,
    transferred: Amount,
}

impl LedgerBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn transferred(&self) -> Amount {
        self.transferred
    }

    /// Make transfers to `address` fail, as a reverting recipient would.
    pub fn refuse(&mut self, address: Address) {
        self.refusing.insert(address);
    }

    pub fn accept(&mut self, address: &Address) {
        self.refusing.remove(address);
    }
}

impl PayoutSink for LedgerBalances {
    fn try_transfer(&mut self, recipient: &Address, amount: Amount) -> bool {
        if self.refusing.contains(recipient) {
            return false;
        }
        let balance = self.balances.entry(*recipient).or_insert(0);
        match balance.checked_add(amount) {
            Some(next) => {
                *balance = next;
                self.transferred += amount;
                true
            }
            None => false,
        }
    }
}
