//! Safety layer for the Trinity coordinator.
//!
//! Windowed anomaly detection with tiered evaluation, a fail-closed circuit
//! breaker with escalating cooldowns and emergency control, and a per-initiator
//! token-bucket throttle. All time is ledger time supplied by the caller.

pub mod breaker;
pub mod detector;
pub mod error;
pub mod rate_limit;
