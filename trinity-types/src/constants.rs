use crate::primitives::BasisPoints;

// ─── Consensus ───────────────────────────────────────────────────────────────

/// Number of independent ledgers taking part in consensus.
pub const LEDGER_COUNT: usize = 3;

/// Valid proofs needed before an operation is released.
pub const CONSENSUS_THRESHOLD: usize = 2;

// ─── Merkle Proofs ───────────────────────────────────────────────────────────

/// Hard upper bound on a sibling path, whatever the network parameters say.
pub const MAX_MERKLE_DEPTH: usize = 32;

/// Default validity of a ledger Merkle root (seconds).
pub const DEFAULT_ROOT_VALIDITY: u64 = 86_400; // 24 hours

/// Maximum timestamp drift into the future (seconds).
pub const MAX_TIMESTAMP_DRIFT: u64 = 300; // 5 minutes

/// BLAKE3 derive-key context for operation fingerprints.
pub const OPERATION_ID_CONTEXT: &str = "trinity operation id v1";

// ─── Fees ────────────────────────────────────────────────────────────────────

/// Share of a fee owed to proof submitters (percent).
pub const VALIDATOR_SHARE_PCT: u128 = 80;

/// Share of a fee owed to the protocol (percent).
pub const PROTOCOL_SHARE_PCT: u128 = 20;

/// Rounding shortfall tolerated by the fee split, exclusive.
pub const MAX_SPLIT_DUST: u128 = 3;

/// Part of the fee refunded when an operation is cancelled.
pub const CANCEL_REFUND: BasisPoints = BasisPoints(8_000);

/// Multiplier applied when the initiator prioritizes speed.
pub const SPEED_MULTIPLIER: BasisPoints = BasisPoints(15_000);

/// Accepted range for the configurable security multiplier.
pub const MIN_SECURITY_MULTIPLIER: BasisPoints = BasisPoints(12_000);
pub const MAX_SECURITY_MULTIPLIER: BasisPoints = BasisPoints(20_000);

// ─── Anomaly Detection ───────────────────────────────────────────────────────

/// Default number of state-changing calls between tier-2 evaluations.
pub const DEFAULT_TIER2_INTERVAL: u64 = 10;

/// Default number of ticks between tier-3 maintenance passes.
pub const DEFAULT_TIER3_INTERVAL: u64 = 100;

// ─── Coordinator Housekeeping ────────────────────────────────────────────────

/// Number of events retained for relayer polling.
pub const MAX_EVENT_LOG: usize = 10_000;

/// Expired operations swept per maintenance pass.
pub const EXPIRY_SWEEP_BATCH: usize = 64;
