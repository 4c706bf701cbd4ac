//! Shared type definitions for the Trinity 2-of-3 consensus coordinator.

pub mod breaker;
pub mod constants;
pub mod epoch;
pub mod error;
pub mod event;
pub mod ledger;
pub mod network;
pub mod operation;
pub mod primitives;
pub mod proof;

#[cfg(test)]
mod tests {
    use borsh::{BorshDeserialize, BorshSerialize};

    /// Helper: borsh round-trip test.
    fn borsh_roundtrip<T: BorshSerialize + BorshDeserialize + PartialEq + std::fmt::Debug>(
        value: &T,
    ) {
        let encoded = borsh::to_vec(value).expect("borsh serialize failed");
        let decoded = T::try_from_slice(&encoded).expect("borsh deserialize failed");
        assert_eq!(*value, decoded);
    }

    #[test]
    fn test_ledger_id_encodes_as_discriminant() {
        use crate::ledger::LedgerId;
        assert_eq!(borsh::to_vec(&LedgerId::Solana).unwrap(), vec![2u8]);
        borsh_roundtrip(&LedgerId::Ton);
    }

    #[test]
    fn test_breaker_state_roundtrip() {
        use crate::breaker::{CircuitBreakerState, TripReason};
        let state = CircuitBreakerState {
            active: true,
            emergency_pause: false,
            triggered_at: Some(1_000),
            reason: Some(TripReason::ProofFailureRate {
                failed: 5,
                total: 10,
            }),
            recovery_attempts: 2,
            cooldown_until: 5_000,
        };
        borsh_roundtrip(&state);
    }

    #[test]
    fn test_event_record_roundtrip() {
        use crate::event::{CoordinatorEvent, EventRecord};
        use crate::ledger::LedgerId;
        let record = EventRecord {
            seq: 9,
            timestamp: 100,
            event: CoordinatorEvent::OperationCreated {
                operation_id: [1u8; 32],
                initiator: [2u8; 20],
                source_ledger: LedgerId::Ethereum,
                destination_ledger: LedgerId::Ton,
                amount: 100,
            },
        };
        borsh_roundtrip(&record);
    }
}
