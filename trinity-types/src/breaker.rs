use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::primitives::*;

/// Why the circuit breaker tripped.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum TripReason {
    /// Current window volume exceeded the trailing baseline by `ratio_pct`.
    VolumeSpike { ratio_pct: u64 },
    /// Proof failure rate over the trailing window.
    ProofFailureRate { failed: u64, total: u64 },
    /// Too many operations created in one window.
    OperationBurst { count: u64 },
    /// Manual pause by the emergency controller.
    Emergency { reason: String },
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TripReason::VolumeSpike { ratio_pct } => {
                write!(f, "volume spike at {}% of baseline", ratio_pct)
            }
            TripReason::ProofFailureRate { failed, total } => {
                write!(f, "proof failure rate {}/{}", failed, total)
            }
            TripReason::OperationBurst { count } => {
                write!(f, "{} operations in one window", count)
            }
            TripReason::Emergency { reason } => write!(f, "emergency: {}", reason),
        }
    }
}

/// Process-wide breaker state. Created inactive; only reset, never deleted.
#[derive(
    Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CircuitBreakerState {
    pub active: bool,
    pub emergency_pause: bool,
    pub triggered_at: Option<Timestamp>,
    pub reason: Option<TripReason>,
    pub recovery_attempts: u32,
    pub cooldown_until: Timestamp,
}

/// Action requested by the emergency controller.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum ControllerAction {
    Pause { reason: String },
    Resume,
}

/// A signed command from the emergency controller identity.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ControllerCommand {
    pub action: ControllerAction,
    pub controller: PublicKey,
    /// Must strictly increase across accepted commands.
    pub issued_at: Timestamp,
    #[serde(with = "crate::primitives::serde_sig")]
    pub signature: Signature,
}

impl ControllerCommand {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(b"trinity:controller:");
        match &self.action {
            ControllerAction::Pause { reason } => {
                data.push(1);
                data.extend_from_slice(&(reason.len() as u32).to_le_bytes());
                data.extend_from_slice(reason.as_bytes());
            }
            ControllerAction::Resume => data.push(2),
        }
        data.extend_from_slice(&self.controller);
        data.extend_from_slice(&self.issued_at.to_le_bytes());
        data
    }
}
