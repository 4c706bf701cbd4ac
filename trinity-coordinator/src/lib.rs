//! Consensus coordinator for Trinity.
//!
//! Owns operations and their proofs, enforces the 2-of-3 threshold with
//! auto-execution, prices and settles fees with exact accounting, and gates
//! every mutating call through the sentinel's tiered checks.

pub mod coordinator;
pub mod epoch;
pub mod error;
pub mod events;
pub mod fees;
pub mod payout;
pub mod validation;
