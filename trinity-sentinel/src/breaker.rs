use tracing::{info, warn};

use trinity_crypto::keys;
use trinity_types::breaker::{CircuitBreakerState, ControllerAction, ControllerCommand, TripReason};
use trinity_types::constants::MAX_TIMESTAMP_DRIFT;
use trinity_types::network::BreakerParams;
use trinity_types::primitives::{short_hex, PublicKey, Timestamp};

use crate::error::SentinelError;

/// Transition caused by a breaker call, for the caller to turn into events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerTransition {
    Tripped {
        reason: TripReason,
        cooldown_until: Timestamp,
    },
    Cleared {
        manual: bool,
    },
}

/// Fail-closed circuit breaker.
///
/// Owns the single [`CircuitBreakerState`] of a coordinator. The state is only
/// mutated through [`trip`](Self::trip), [`try_auto_recover`](Self::try_auto_recover)
/// and signed controller commands.
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    params: BreakerParams,
    controller: PublicKey,
    last_command_at: Option<Timestamp>,
}

impl CircuitBreaker {
    pub fn new(params: BreakerParams, controller: PublicKey) -> Self {
        Self {
            state: CircuitBreakerState::default(),
            params,
            controller,
            last_command_at: None,
        }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    pub fn controller(&self) -> &PublicKey {
        &self.controller
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Cooldown length after `attempts` prior escalations.
    pub fn cooldown_for(&self, attempts: u32) -> u64 {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        self.params
            .base_cooldown
            .saturating_mul(factor)
            .min(self.params.max_cooldown)
    }

    /// Tier-1 gate. Auto-recovers first if the cooldown has elapsed.
    pub fn ensure_closed(
        &mut self,
        now: Timestamp,
    ) -> Result<Option<BreakerTransition>, SentinelError> {
        let transition = self.try_auto_recover(now);
        if self.state.emergency_pause {
            return Err(SentinelError::EmergencyPause {
                reason: self.reason_string(),
            });
        }
        if self.state.active {
            return Err(SentinelError::BreakerActive {
                reason: self.reason_string(),
                cooldown_until: self.state.cooldown_until,
            });
        }
        Ok(transition)
    }

    fn reason_string(&self) -> String {
        self.state
            .reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Open the breaker.
    ///
    /// A trip while active, or within one cooldown length after the previous
    /// cooldown ended, escalates; otherwise the escalation counter resets.
    pub fn trip(&mut self, reason: TripReason, now: Timestamp) -> BreakerTransition {
        let previous = self.cooldown_for(self.state.recovery_attempts);
        let flapping = self.state.active
            || (self.state.cooldown_until > 0
                && now < self.state.cooldown_until.saturating_add(previous));
        self.state.recovery_attempts = if flapping {
            self.state.recovery_attempts.saturating_add(1)
        } else {
            0
        };

        let cooldown = self.cooldown_for(self.state.recovery_attempts);
        self.state.active = true;
        self.state.triggered_at = Some(now);
        self.state.reason = Some(reason.clone());
        self.state.cooldown_until = now.saturating_add(cooldown);

        warn!(
            %reason,
            attempts = self.state.recovery_attempts,
            cooldown_until = self.state.cooldown_until,
            "circuit breaker tripped"
        );
        BreakerTransition::Tripped {
            reason,
            cooldown_until: self.state.cooldown_until,
        }
    }

    /// Clear an automatic trip once its cooldown has elapsed. Never clears an
    /// emergency pause.
    pub fn try_auto_recover(&mut self, now: Timestamp) -> Option<BreakerTransition> {
        if !self.state.active || self.state.emergency_pause || now < self.state.cooldown_until {
            return None;
        }
        self.state.active = false;
        self.state.triggered_at = None;
        self.state.reason = None;
        info!(
            attempts = self.state.recovery_attempts,
            "circuit breaker recovered"
        );
        Some(BreakerTransition::Cleared { manual: false })
    }

    /// Apply a signed pause/resume from the emergency controller.
    pub fn apply_command(
        &mut self,
        command: &ControllerCommand,
        now: Timestamp,
    ) -> Result<BreakerTransition, SentinelError> {
        if command.controller != self.controller {
            return Err(SentinelError::UnauthorizedController);
        }
        keys::verify(
            &command.signing_bytes(),
            &command.signature,
            &command.controller,
        )
        .map_err(|_| SentinelError::InvalidControllerSignature)?;
        let last = self.last_command_at.unwrap_or(0);
        let replayed = self.last_command_at.is_some() && command.issued_at <= last;
        if replayed || command.issued_at > now.saturating_add(MAX_TIMESTAMP_DRIFT) {
            return Err(SentinelError::StaleCommand {
                issued_at: command.issued_at,
                last,
            });
        }
        self.last_command_at = Some(command.issued_at);

        match &command.action {
            ControllerAction::Pause { reason } => {
                let reason = TripReason::Emergency {
                    reason: reason.clone(),
                };
                self.state.active = true;
                self.state.emergency_pause = true;
                self.state.triggered_at = Some(now);
                self.state.reason = Some(reason.clone());
                warn!(
                    controller = %short_hex(&command.controller),
                    %reason,
                    "emergency pause"
                );
                Ok(BreakerTransition::Tripped {
                    reason,
                    cooldown_until: self.state.cooldown_until,
                })
            }
            ControllerAction::Resume => {
                self.state = CircuitBreakerState::default();
                info!(controller = %short_hex(&command.controller), "manual resume");
                Ok(BreakerTransition::Cleared { manual: true })
            }
        }
    }
}
