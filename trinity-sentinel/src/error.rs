use thiserror::Error;

use trinity_types::primitives::Timestamp;

/// Errors raised by the sentinel's checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SentinelError {
    #[error("circuit breaker active ({reason}) until {cooldown_until}")]
    BreakerActive {
        reason: String,
        cooldown_until: Timestamp,
    },

    #[error("emergency pause in effect: {reason}")]
    EmergencyPause { reason: String },

    #[error("rate limit exceeded for initiator {initiator}")]
    RateLimitExceeded { initiator: String },

    #[error("command not signed by the emergency controller")]
    UnauthorizedController,

    #[error("invalid controller signature")]
    InvalidControllerSignature,

    #[error("controller command issued at {issued_at} does not follow {last}")]
    StaleCommand { issued_at: Timestamp, last: Timestamp },
}
