use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::TrinityError;
use crate::primitives::{Amount, BasisPoints};

/// Network identifier for distinguishing dev, testnet, and mainnet environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Dev,
    Testnet,
    Mainnet,
}

impl NetworkId {
    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            NetworkId::Dev => "Development",
            NetworkId::Testnet => "Testnet",
            NetworkId::Mainnet => "Mainnet",
        }
    }

    /// Short lowercase identifier (for CLI/config).
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::Dev => "dev",
            NetworkId::Testnet => "testnet",
            NetworkId::Mainnet => "mainnet",
        }
    }

    /// Parse from a string identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dev" => Some(NetworkId::Dev),
            "testnet" => Some(NetworkId::Testnet),
            "mainnet" => Some(NetworkId::Mainnet),
            _ => None,
        }
    }

    /// Parameter preset for this network.
    pub fn params(&self) -> ProtocolParams {
        match self {
            NetworkId::Dev => ProtocolParams::dev(),
            NetworkId::Testnet => ProtocolParams::testnet(),
            NetworkId::Mainnet => ProtocolParams::mainnet(),
        }
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Fee constants. Amounts are in the smallest fee unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub base_fee: u64,
    /// Applied when an operation prioritizes security (1.2x to 2.0x).
    pub security_multiplier: BasisPoints,
    /// Ceiling applied after multipliers.
    pub max_fee: u64,
}

/// Bounds on operation creation and per-initiator throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationParams {
    pub min_amount: u64,
    pub max_amount: u64,
    /// Lifetime bounds in seconds.
    pub min_duration: u64,
    pub max_duration: u64,
    /// Operations an initiator may open in a burst.
    pub initiator_burst: u64,
    /// Seconds to regain one operation of burst capacity.
    pub initiator_refill_interval: u64,
}

/// Merkle proof acceptance parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleParams {
    /// Seconds a ledger root stays acceptable after its commitment.
    pub root_validity: u64,
    pub max_proof_depth: usize,
}

/// Circuit breaker thresholds and cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerParams {
    /// Length of one volume window in seconds.
    pub volume_window: u64,
    /// Trailing windows averaged into the baseline.
    pub baseline_windows: u32,
    /// Trip when current volume exceeds this percentage of the baseline.
    pub volume_spike_ratio_pct: u64,
    /// Trailing window for the proof failure rate, in seconds.
    pub failure_window: u64,
    pub failure_rate_pct: u64,
    /// Fewer samples than this never trip the failure-rate check.
    pub min_failure_samples: u64,
    /// Length of the burst-count window in seconds.
    pub ops_window: u64,
    pub max_ops_per_window: u64,
    pub base_cooldown: u64,
    pub max_cooldown: u64,
}

/// Tiered-check cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    /// State-changing calls between tier-2 evaluations.
    pub tier2_interval: u64,
    /// Ticks between tier-3 maintenance passes.
    pub tier3_interval: u64,
}

/// Fee epoch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochParams {
    /// Epoch length in seconds.
    pub duration: u64,
}

/// Every tunable of the coordinator, selected by network at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub fees: FeeParams,
    pub operations: OperationParams,
    pub merkle: MerkleParams,
    pub breaker: BreakerParams,
    pub tiers: TierParams,
    pub epochs: EpochParams,
}

impl ProtocolParams {
    /// Loose limits for local development.
    pub fn dev() -> Self {
        Self {
            fees: FeeParams {
                base_fee: 1_000,
                security_multiplier: BasisPoints(12_000),
                max_fee: 1_000_000,
            },
            operations: OperationParams {
                min_amount: 1,
                max_amount: 1_000_000_000_000,
                min_duration: 60,
                max_duration: 7 * 86_400,
                initiator_burst: 1_000,
                initiator_refill_interval: 1,
            },
            merkle: MerkleParams {
                root_validity: DEFAULT_ROOT_VALIDITY,
                max_proof_depth: MAX_MERKLE_DEPTH,
            },
            breaker: BreakerParams {
                volume_window: 3_600,
                baseline_windows: 24,
                volume_spike_ratio_pct: 10_000,
                failure_window: 3_600,
                failure_rate_pct: 50,
                min_failure_samples: 20,
                ops_window: 60,
                max_ops_per_window: 10_000,
                base_cooldown: 60,
                max_cooldown: 3_600,
            },
            tiers: TierParams {
                tier2_interval: DEFAULT_TIER2_INTERVAL,
                tier3_interval: DEFAULT_TIER3_INTERVAL,
            },
            epochs: EpochParams { duration: 3_600 },
        }
    }

    /// Test networks tolerate more failures than production.
    pub fn testnet() -> Self {
        let mut params = Self::dev();
        params.fees.security_multiplier = BasisPoints(15_000);
        params.operations.initiator_burst = 50;
        params.operations.initiator_refill_interval = 30;
        params.breaker.volume_spike_ratio_pct = 1_000;
        params.breaker.failure_rate_pct = 50;
        params.breaker.min_failure_samples = 10;
        params.breaker.max_ops_per_window = 500;
        params.breaker.base_cooldown = 300;
        params.breaker.max_cooldown = 6 * 3_600;
        params.epochs.duration = 86_400;
        params
    }

    /// Strict production thresholds.
    pub fn mainnet() -> Self {
        let mut params = Self::testnet();
        params.fees.security_multiplier = BasisPoints(20_000);
        params.operations.min_amount = 1_000;
        params.operations.min_duration = 3_600;
        params.operations.max_duration = 30 * 86_400;
        params.operations.initiator_burst = 10;
        params.operations.initiator_refill_interval = 60;
        params.breaker.volume_spike_ratio_pct = 500;
        params.breaker.failure_rate_pct = 20;
        params.breaker.max_ops_per_window = 100;
        params.breaker.base_cooldown = 900;
        params.breaker.max_cooldown = 24 * 3_600;
        params.epochs.duration = 7 * 86_400;
        params
    }

    pub fn base_fee(&self) -> Amount {
        self.fees.base_fee as Amount
    }

    pub fn max_fee(&self) -> Amount {
        self.fees.max_fee as Amount
    }

    /// Reject parameter sets that would break invariants at runtime.
    pub fn validate(&self) -> Result<(), TrinityError> {
        let invalid = |reason: &str| {
            Err(TrinityError::InvalidParams {
                reason: reason.to_string(),
            })
        };
        let sec = self.fees.security_multiplier;
        if sec < MIN_SECURITY_MULTIPLIER || sec > MAX_SECURITY_MULTIPLIER {
            return invalid("security multiplier must be within 1.2x..=2.0x");
        }
        if self.fees.base_fee == 0 {
            return invalid("base_fee must be positive");
        }
        if self.fees.max_fee < self.fees.base_fee {
            return invalid("max_fee below base_fee");
        }
        if self.operations.min_amount == 0 || self.operations.min_amount > self.operations.max_amount
        {
            return invalid("amount bounds are empty");
        }
        if self.operations.min_duration == 0
            || self.operations.min_duration > self.operations.max_duration
        {
            return invalid("duration bounds are empty");
        }
        if self.operations.initiator_refill_interval == 0 {
            return invalid("initiator_refill_interval must be positive");
        }
        if self.merkle.max_proof_depth == 0 || self.merkle.max_proof_depth > MAX_MERKLE_DEPTH {
            return invalid("max_proof_depth out of range");
        }
        if self.merkle.root_validity == 0 {
            return invalid("root_validity must be positive");
        }
        if self.breaker.volume_window == 0
            || self.breaker.failure_window == 0
            || self.breaker.ops_window == 0
        {
            return invalid("breaker windows must be positive");
        }
        if self.breaker.failure_rate_pct > 100 {
            return invalid("failure_rate_pct above 100");
        }
        if self.breaker.base_cooldown == 0 || self.breaker.max_cooldown < self.breaker.base_cooldown
        {
            return invalid("cooldown bounds are empty");
        }
        if self.tiers.tier2_interval == 0 || self.tiers.tier3_interval == 0 {
            return invalid("tier intervals must be positive");
        }
        if self.epochs.duration == 0 {
            return invalid("epoch duration must be positive");
        }
        Ok(())
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self::dev()
    }
}
