use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, error, info, warn};

use trinity_crypto::address::pubkey_to_address;
use trinity_crypto::commitment;
use trinity_crypto::keys::verify;
use trinity_sentinel::breaker::{BreakerTransition, CircuitBreaker};
use trinity_sentinel::detector::{AnomalyDetector, DetectorStats};
use trinity_sentinel::error::SentinelError;
use trinity_sentinel::rate_limit::InitiatorThrottle;
use trinity_types::breaker::{CircuitBreakerState, ControllerCommand};
use trinity_types::constants::{
    CONSENSUS_THRESHOLD, EXPIRY_SWEEP_BATCH, MAX_EVENT_LOG, MAX_TIMESTAMP_DRIFT,
};
use trinity_types::epoch::FeeEpoch;
use trinity_types::event::{CoordinatorEvent, EventRecord};
use trinity_types::ledger::LedgerId;
use trinity_types::network::ProtocolParams;
use trinity_types::operation::{
    CancelRequest, CancellationReceipt, CreateOperationRequest, Operation, OperationFingerprint,
    OperationStatus,
};
use trinity_types::primitives::*;
use trinity_types::proof::{ChainProof, ProofReceipt};

use crate::epoch::EpochBook;
use crate::error::{CoordinatorError, ErrorKind};
use crate::events::EventLog;
use crate::fees::{self, AccountingError};
use crate::payout::PayoutSink;
use crate::validation;

/// Static configuration of a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub params: ProtocolParams,
    /// Key allowed to pause and resume the breaker.
    pub controller: PublicKey,
    /// Relayer keys allowed to submit proofs, per proving ledger.
    pub relayers: BTreeMap<LedgerId, BTreeSet<PublicKey>>,
    /// Start of the first fee epoch.
    pub genesis_time: Timestamp,
}

/// The consensus coordinator.
///
/// Owns every operation and releases it once two of the three ledgers have
/// proven it. Calls are expected to be serialized by the host; each takes the
/// host's current timestamp.
pub struct Coordinator<P: PayoutSink> {
    params: ProtocolParams,
    relayers: BTreeMap<LedgerId, BTreeSet<PublicKey>>,
    operations: HashMap<OperationId, Operation>,
    /// Next sequence number per initiator.
    sequences: HashMap<Address, u64>,
    /// Pending operations ordered by expiry.
    expiry_queue: BTreeSet<(Timestamp, OperationId)>,
    breaker: CircuitBreaker,
    detector: AnomalyDetector,
    throttle: InitiatorThrottle,
    epochs: EpochBook,
    events: EventLog,
    payouts: P,
    /// Payouts whose transfer failed, claimable later.
    deferred: BTreeMap<Address, Amount>,
    /// Fees of pending operations.
    escrow: Amount,
    fees_collected: Amount,
    fees_refunded: Amount,
    halted: Option<String>,
}

impl<P: PayoutSink> Coordinator<P> {
    pub fn new(config: CoordinatorConfig, payouts: P) -> Result<Self, CoordinatorError> {
        config.params.validate()?;
        let params = config.params;
        Ok(Self {
            breaker: CircuitBreaker::new(params.breaker.clone(), config.controller),
            detector: AnomalyDetector::new(params.breaker.clone(), params.tiers.clone()),
            throttle: InitiatorThrottle::new(
                params.operations.initiator_burst,
                params.operations.initiator_refill_interval,
            ),
            epochs: EpochBook::new(config.genesis_time, params.epochs.duration),
            events: EventLog::new(MAX_EVENT_LOG),
            relayers: config.relayers,
            operations: HashMap::new(),
            sequences: HashMap::new(),
            expiry_queue: BTreeSet::new(),
            payouts,
            deferred: BTreeMap::new(),
            escrow: 0,
            fees_collected: 0,
            fees_refunded: 0,
            halted: None,
            params,
        })
    }

    // ─── Mutating calls ──────────────────────────────────────────────────────

    /// Open a new operation. Returns its id.
    pub fn create_operation(
        &mut self,
        request: &CreateOperationRequest,
        now: Timestamp,
    ) -> Result<OperationId, CoordinatorError> {
        self.tier1_gate(now)?;

        if request.source_ledger == request.destination_ledger {
            return Err(CoordinatorError::SameLedger {
                ledger: request.source_ledger,
            });
        }
        verify(&request.signing_bytes(), &request.signature, &request.initiator)
            .map_err(|_| CoordinatorError::InvalidSignature)?;
        if request.timestamp > now.saturating_add(MAX_TIMESTAMP_DRIFT) {
            return Err(CoordinatorError::TimestampTooFuture {
                timestamp: request.timestamp,
                now,
            });
        }

        let bounds = &self.params.operations;
        let (min, max) = (bounds.min_amount as Amount, bounds.max_amount as Amount);
        if request.amount < min || request.amount > max {
            return Err(CoordinatorError::AmountOutOfBounds {
                amount: request.amount,
                min,
                max,
            });
        }
        if request.duration < bounds.min_duration || request.duration > bounds.max_duration {
            return Err(CoordinatorError::DurationOutOfBounds {
                duration: request.duration,
                min: bounds.min_duration,
                max: bounds.max_duration,
            });
        }

        let initiator = pubkey_to_address(&request.initiator);
        if !self.throttle.check(&initiator, now) {
            return Err(SentinelError::RateLimitExceeded {
                initiator: hex::encode(initiator),
            }
            .into());
        }

        let fee = fees::price_operation(
            &self.params.fees,
            request.prioritize_speed,
            request.prioritize_security,
        );
        if request.paid_value < fee {
            return Err(CoordinatorError::InsufficientFee {
                paid: request.paid_value,
                fee,
            });
        }

        let sequence = self.sequences.get(&initiator).copied().unwrap_or(0);
        let id = commitment::operation_id(&OperationFingerprint {
            initiator,
            source_ledger: request.source_ledger,
            destination_ledger: request.destination_ledger,
            target: request.target,
            amount: request.amount,
            sequence,
        })?;
        if self.operations.contains_key(&id) {
            return Err(CoordinatorError::DuplicateOperation {
                id: hex::encode(id),
            });
        }

        let operation = Operation {
            id,
            initiator,
            initiator_pubkey: request.initiator,
            source_ledger: request.source_ledger,
            destination_ledger: request.destination_ledger,
            target: request.target,
            amount: request.amount,
            fee,
            sequence,
            created_at: now,
            expires_at: now.saturating_add(request.duration),
            status: OperationStatus::Pending,
            confirmed_ledgers: BTreeSet::new(),
        };
        self.expiry_queue.insert((operation.expires_at, id));
        self.operations.insert(id, operation);
        self.sequences.insert(initiator, sequence + 1);
        self.escrow += fee;
        self.fees_collected += fee;
        self.detector.record_operation(request.amount, now);

        self.emit(
            CoordinatorEvent::OperationCreated {
                operation_id: id,
                initiator,
                source_ledger: request.source_ledger,
                destination_ledger: request.destination_ledger,
                amount: request.amount,
            },
            now,
        );
        info!(
            operation = %short_hex(&id),
            source = %request.source_ledger,
            destination = %request.destination_ledger,
            amount = %request.amount,
            fee = %fee,
            "operation created"
        );

        self.pay(&initiator, request.paid_value - fee, now);
        self.after_state_change(now)?;
        Ok(id)
    }

    /// Record one ledger's proof for an operation. Crossing the threshold
    /// executes the operation before returning.
    pub fn submit_proof(
        &mut self,
        proof: &ChainProof,
        now: Timestamp,
    ) -> Result<ProofReceipt, CoordinatorError> {
        self.tier1_gate(now)?;

        let result = self.accept_proof(proof, now);
        let changed = match &result {
            Ok(_) | Err(CoordinatorError::OperationExpired { .. }) => true,
            Err(e) if e.kind() == ErrorKind::InvalidProof => {
                self.detector.record_proof(false, now);
                warn!(
                    operation = %short_hex(&proof.operation_id),
                    ledger = %proof.ledger_id,
                    error = %e,
                    "proof rejected"
                );
                true
            }
            Err(_) => false,
        };
        if changed {
            self.after_state_change(now)?;
        }
        result
    }

    fn accept_proof(
        &mut self,
        proof: &ChainProof,
        now: Timestamp,
    ) -> Result<ProofReceipt, CoordinatorError> {
        validation::check_binding(proof, &self.relayers)?;
        let id = proof.operation_id;
        self.expire_if_due(&id, now)?;

        let operation = self.operation_ref(&id)?;
        if matches!(
            operation.status,
            OperationStatus::Cancelled | OperationStatus::Expired
        ) {
            return Err(CoordinatorError::OperationTerminal {
                status: operation.status,
            });
        }
        if operation.is_confirmed_by(proof.ledger_id) {
            debug!(
                operation = %short_hex(&id),
                ledger = %proof.ledger_id,
                "duplicate ledger proof"
            );
            return Err(CoordinatorError::DuplicateLedgerProof {
                ledger: proof.ledger_id,
            });
        }
        validation::check_root_freshness(proof, now, &self.params.merkle)?;
        validation::verify_inclusion(proof, self.params.merkle.max_proof_depth)?;

        self.detector.record_proof(true, now);
        self.epochs.record_proof(proof.ledger_id, proof.submitter);

        let operation = self.operation_mut(&id)?;
        operation.confirmed_ledgers.insert(proof.ledger_id);
        let valid_proof_count = operation.valid_proof_count();
        let crossed =
            operation.status == OperationStatus::Pending && valid_proof_count >= CONSENSUS_THRESHOLD;
        if crossed {
            operation.status = OperationStatus::Verified;
        }
        debug_assert!(operation.invariants_hold());

        self.emit(
            CoordinatorEvent::ProofSubmitted {
                operation_id: id,
                ledger_id: proof.ledger_id,
                merkle_root: proof.merkle_root,
            },
            now,
        );
        info!(
            operation = %short_hex(&id),
            ledger = %proof.ledger_id,
            count = valid_proof_count,
            "proof accepted"
        );

        if crossed {
            self.emit(
                CoordinatorEvent::ConsensusReached {
                    operation_id: id,
                    valid_proof_count,
                },
                now,
            );
            self.execute(&id, now)?;
        }

        Ok(ProofReceipt {
            valid_proof_count,
            status: self.operation_ref(&id)?.status,
            executed: crossed,
        })
    }

    fn execute(&mut self, id: &OperationId, now: Timestamp) -> Result<(), CoordinatorError> {
        let operation = self.operation_mut(id)?;
        operation.status = OperationStatus::Executed;
        let (fee, expires_at) = (operation.fee, operation.expires_at);

        self.release_escrow(fee)?;
        self.epochs.record_fee(fee);
        self.expiry_queue.remove(&(expires_at, *id));
        self.emit(
            CoordinatorEvent::OperationExecuted {
                operation_id: *id,
                fee,
            },
            now,
        );
        info!(operation = %short_hex(id), fee = %fee, "operation executed");
        Ok(())
    }

    /// Cancel a pending operation on behalf of its initiator.
    ///
    /// 80% of the fee is refunded (rounded down) and the remainder is kept as
    /// a penalty. The refund uses the non-reverting payout path: a refused
    /// transfer is deferred and the cancellation still happens.
    pub fn cancel_operation(
        &mut self,
        request: &CancelRequest,
        now: Timestamp,
    ) -> Result<CancellationReceipt, CoordinatorError> {
        self.ensure_running()?;
        self.roll_epochs(now)?;

        verify(&request.signing_bytes(), &request.signature, &request.initiator)
            .map_err(|_| CoordinatorError::InvalidSignature)?;
        let id = request.operation_id;
        if self.operation_ref(&id)?.initiator_pubkey != request.initiator {
            return Err(CoordinatorError::NotInitiator);
        }
        if let Err(e) = self.expire_if_due(&id, now) {
            if matches!(e, CoordinatorError::OperationExpired { .. }) {
                self.after_state_change(now)?;
            }
            return Err(e);
        }

        let operation = self.operation_ref(&id)?;
        if operation.status != OperationStatus::Pending {
            return Err(CoordinatorError::OperationTerminal {
                status: operation.status,
            });
        }
        let (fee, initiator, expires_at) =
            (operation.fee, operation.initiator, operation.expires_at);
        let (refund, penalty) = match fees::cancellation_refund(fee) {
            Ok(split) => split,
            Err(e) => return Err(self.halt(e)),
        };

        self.operation_mut(&id)?.status = OperationStatus::Cancelled;
        self.release_escrow(fee)?;
        self.fees_refunded += refund;
        self.epochs.credit_protocol(penalty);
        self.expiry_queue.remove(&(expires_at, id));
        self.emit(
            CoordinatorEvent::OperationCancelled {
                operation_id: id,
                refund,
                penalty,
            },
            now,
        );
        info!(
            operation = %short_hex(&id),
            refund = %refund,
            penalty = %penalty,
            "operation cancelled"
        );

        let refund_delivered = self.pay(&initiator, refund, now);
        self.after_state_change(now)?;
        Ok(CancellationReceipt {
            refund,
            penalty,
            refund_delivered,
        })
    }

    /// Apply a signed pause or resume from the emergency controller. Works
    /// while the breaker is open.
    pub fn apply_controller_command(
        &mut self,
        command: &ControllerCommand,
        now: Timestamp,
    ) -> Result<(), CoordinatorError> {
        self.ensure_running()?;
        let transition = self.breaker.apply_command(command, now)?;
        self.emit_transition(transition, now);
        Ok(())
    }

    /// Advance host time. Every `tier3_interval` ticks runs maintenance:
    /// prune throttle buckets, try breaker auto-recovery, sweep expired
    /// operations. Returns true when maintenance ran.
    pub fn on_tick(&mut self, now: Timestamp) -> Result<bool, CoordinatorError> {
        self.ensure_running()?;
        self.roll_epochs(now)?;
        if !self.detector.on_tick(now) {
            return Ok(false);
        }

        let pruned = self.throttle.prune_idle(now);
        if let Some(transition) = self.breaker.try_auto_recover(now) {
            self.emit_transition(transition, now);
        }
        let swept = self.sweep_expired(now)?;
        debug!(pruned, swept, "tier-3 maintenance");
        self.audit()?;
        Ok(true)
    }

    /// Pay out `submitter`'s reward for a settled epoch.
    pub fn claim_epoch_reward(
        &mut self,
        epoch_id: EpochId,
        submitter: &PublicKey,
        now: Timestamp,
    ) -> Result<Amount, CoordinatorError> {
        self.ensure_running()?;
        self.roll_epochs(now)?;
        let amount = match self.epochs.claim(epoch_id, submitter) {
            Ok(amount) => amount,
            Err(CoordinatorError::Accounting(e)) => return Err(self.halt(e)),
            Err(e) => return Err(e),
        };
        self.pay(&pubkey_to_address(submitter), amount, now);
        self.emit(
            CoordinatorEvent::RewardClaimed {
                epoch_id,
                submitter: *submitter,
                amount,
            },
            now,
        );
        self.audit()?;
        Ok(amount)
    }

    /// Retry a deferred payout. Returns the amount delivered, or `None` if the
    /// recipient still refuses it.
    pub fn claim_deferred(
        &mut self,
        recipient: &Address,
    ) -> Result<Option<Amount>, CoordinatorError> {
        self.ensure_running()?;
        let owed = match self.deferred.get(recipient) {
            Some(owed) => *owed,
            None => return Err(CoordinatorError::NothingDeferred),
        };
        if !self.payouts.try_transfer(recipient, owed) {
            return Ok(None);
        }
        self.deferred.remove(recipient);
        Ok(Some(owed))
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub fn get_operation(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn has_consensus(&self, id: &OperationId) -> Result<bool, CoordinatorError> {
        Ok(self.operation_ref(id)?.has_consensus())
    }

    /// Fee `create_operation` would charge for these priorities.
    pub fn estimate_fee(&self, prioritize_speed: bool, prioritize_security: bool) -> Amount {
        fees::price_operation(&self.params.fees, prioritize_speed, prioritize_security)
    }

    pub fn events_since(&self, from: u64, limit: usize) -> Vec<EventRecord> {
        self.events.since(from, limit)
    }

    pub fn next_event_seq(&self) -> u64 {
        self.events.next_seq()
    }

    pub fn breaker_state(&self) -> &CircuitBreakerState {
        self.breaker.state()
    }

    pub fn detector_stats(&self, now: Timestamp) -> DetectorStats {
        self.detector.stats(now)
    }

    pub fn current_epoch(&self) -> &FeeEpoch {
        self.epochs.current()
    }

    pub fn epoch(&self, epoch_id: EpochId) -> Option<&FeeEpoch> {
        self.epochs.epoch(epoch_id)
    }

    pub fn protocol_pool(&self) -> Amount {
        self.epochs.protocol_pool()
    }

    pub fn deferred_payout(&self, recipient: &Address) -> Amount {
        self.deferred.get(recipient).copied().unwrap_or(0)
    }

    pub fn escrow(&self) -> Amount {
        self.escrow
    }

    pub fn pending_operations(&self) -> usize {
        self.expiry_queue.len()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn is_authorized_relayer(&self, ledger: LedgerId, key: &PublicKey) -> bool {
        self.relayers
            .get(&ledger)
            .is_some_and(|keys| keys.contains(key))
    }

    pub fn payouts(&self) -> &P {
        &self.payouts
    }

    pub fn payouts_mut(&mut self) -> &mut P {
        &mut self.payouts
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn operation_ref(&self, id: &OperationId) -> Result<&Operation, CoordinatorError> {
        self.operations
            .get(id)
            .ok_or_else(|| CoordinatorError::UnknownOperation { id: hex::encode(id) })
    }

    fn operation_mut(&mut self, id: &OperationId) -> Result<&mut Operation, CoordinatorError> {
        self.operations
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::UnknownOperation { id: hex::encode(id) })
    }

    fn ensure_running(&self) -> Result<(), CoordinatorError> {
        match &self.halted {
            Some(reason) => Err(CoordinatorError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Tier-1 checks shared by creation and proof submission.
    fn tier1_gate(&mut self, now: Timestamp) -> Result<(), CoordinatorError> {
        self.ensure_running()?;
        if let Some(transition) = self.breaker.ensure_closed(now)? {
            self.emit_transition(transition, now);
        }
        self.roll_epochs(now)
    }

    /// Tier-2 evaluation and the conservation audit.
    fn after_state_change(&mut self, now: Timestamp) -> Result<(), CoordinatorError> {
        if let Some(reason) = self.detector.on_state_change(now) {
            let transition = self.breaker.trip(reason, now);
            self.emit_transition(transition, now);
        }
        self.audit()
    }

    fn roll_epochs(&mut self, now: Timestamp) -> Result<(), CoordinatorError> {
        let closed = match self.epochs.roll_if_due(now) {
            Ok(closed) => closed.map(|epoch| {
                let (protocol_share, dust) = epoch
                    .settlement
                    .as_ref()
                    .map(|s| (s.protocol_share, s.dust))
                    .unwrap_or_default();
                CoordinatorEvent::EpochClosed {
                    epoch_id: epoch.epoch_id,
                    fee_pool: epoch.fee_pool,
                    protocol_share,
                    dust,
                }
            }),
            Err(e) => return Err(self.halt(e)),
        };
        if let Some(event) = closed {
            self.emit(event, now);
        }
        Ok(())
    }

    /// Lazily expire a pending operation whose deadline has passed.
    fn expire_if_due(&mut self, id: &OperationId, now: Timestamp) -> Result<(), CoordinatorError> {
        let operation = self.operation_ref(id)?;
        if operation.status != OperationStatus::Pending || !operation.is_expired_at(now) {
            return Ok(());
        }
        let expired_at = operation.expires_at;
        self.expire(id, now)?;
        Err(CoordinatorError::OperationExpired { expired_at })
    }

    /// Mark expired and refund the whole fee; the initiator was not at fault.
    fn expire(&mut self, id: &OperationId, now: Timestamp) -> Result<(), CoordinatorError> {
        let operation = self.operation_mut(id)?;
        operation.status = OperationStatus::Expired;
        let (fee, initiator, expires_at) =
            (operation.fee, operation.initiator, operation.expires_at);

        self.release_escrow(fee)?;
        self.fees_refunded += fee;
        self.expiry_queue.remove(&(expires_at, *id));
        self.emit(CoordinatorEvent::OperationExpired { operation_id: *id }, now);
        info!(operation = %short_hex(id), "operation expired");
        self.pay(&initiator, fee, now);
        Ok(())
    }

    fn sweep_expired(&mut self, now: Timestamp) -> Result<usize, CoordinatorError> {
        let due: Vec<OperationId> = self
            .expiry_queue
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .take(EXPIRY_SWEEP_BATCH)
            .map(|(_, id)| *id)
            .collect();
        for id in &due {
            self.expire(id, now)?;
        }
        Ok(due.len())
    }

    fn release_escrow(&mut self, fee: Amount) -> Result<(), CoordinatorError> {
        match self.escrow.checked_sub(fee) {
            Some(rest) => {
                self.escrow = rest;
                Ok(())
            }
            None => Err(self.halt(AccountingError::Underflow {
                what: "escrow",
                have: self.escrow,
                take: fee,
            })),
        }
    }

    /// Every fee collected is either escrowed, refunded, or in the epoch book.
    fn audit(&mut self) -> Result<(), CoordinatorError> {
        let accounted = self
            .escrow
            .checked_add(self.fees_refunded)
            .and_then(|sum| sum.checked_add(self.epochs.accounted()));
        match accounted {
            Some(accounted) if accounted == self.fees_collected => Ok(()),
            other => Err(self.halt(AccountingError::ConservationBroken {
                collected: self.fees_collected,
                accounted: other.unwrap_or(Amount::MAX),
            })),
        }
    }

    fn halt(&mut self, violation: AccountingError) -> CoordinatorError {
        error!(%violation, "accounting violation, halting coordinator");
        self.halted = Some(violation.to_string());
        CoordinatorError::Accounting(violation)
    }

    /// Non-reverting transfer; a refusal is recorded as a deferred payout.
    fn pay(&mut self, recipient: &Address, amount: Amount, now: Timestamp) -> bool {
        if amount == 0 || self.payouts.try_transfer(recipient, amount) {
            return true;
        }
        *self.deferred.entry(*recipient).or_insert(0) += amount;
        warn!(
            recipient = %short_hex(recipient),
            amount = %amount,
            "payout refused, deferred"
        );
        self.emit(
            CoordinatorEvent::PayoutDeferred {
                recipient: *recipient,
                amount,
            },
            now,
        );
        false
    }

    fn emit(&mut self, event: CoordinatorEvent, now: Timestamp) -> u64 {
        self.events.push(event, now)
    }

    fn emit_transition(&mut self, transition: BreakerTransition, now: Timestamp) {
        let event = match transition {
            BreakerTransition::Tripped {
                reason,
                cooldown_until,
            } => CoordinatorEvent::CircuitBreakerTripped {
                reason,
                cooldown_until,
            },
            BreakerTransition::Cleared { manual } => {
                CoordinatorEvent::CircuitBreakerCleared { manual }
            }
        };
        self.emit(event, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::LedgerBalances;
    use trinity_crypto::keys::Keypair;
    use trinity_crypto::merkle::{self, SortedMerkleTree};
    use trinity_types::breaker::ControllerAction;
    use trinity_types::proof::BlockReference;

    const T0: Timestamp = 1_700_000_000;

    struct Harness {
        coordinator: Coordinator<LedgerBalances>,
        user: Keypair,
        relayers: BTreeMap<LedgerId, Keypair>,
        controller: Keypair,
    }

    fn params(base_fee: u64) -> ProtocolParams {
        let mut params = ProtocolParams::dev();
        params.fees.base_fee = base_fee;
        params
    }

    fn harness_with(params: ProtocolParams) -> Harness {
        let user = Keypair::from_seed(&[1u8; 32]);
        let controller = Keypair::from_seed(&[2u8; 32]);
        let relayers: BTreeMap<LedgerId, Keypair> = LedgerId::ALL
            .iter()
            .map(|l| (*l, Keypair::from_seed(&[10 + l.as_u8(); 32])))
            .collect();
        let config = CoordinatorConfig {
            params,
            controller: controller.public_key(),
            relayers: relayers
                .iter()
                .map(|(l, kp)| (*l, BTreeSet::from([kp.public_key()])))
                .collect(),
            genesis_time: T0,
        };
        Harness {
            coordinator: Coordinator::new(config, LedgerBalances::new()).unwrap(),
            user,
            relayers,
            controller,
        }
    }

    fn harness() -> Harness {
        harness_with(params(1))
    }

    impl Harness {
        fn user_address(&self) -> Address {
            pubkey_to_address(&self.user.public_key())
        }

        fn request(&self, amount: Amount, paid_value: Amount) -> CreateOperationRequest {
            let mut request = CreateOperationRequest {
                initiator: self.user.public_key(),
                source_ledger: LedgerId::Ethereum,
                destination_ledger: LedgerId::Solana,
                target: None,
                amount,
                duration: 3_600,
                prioritize_speed: false,
                prioritize_security: false,
                paid_value,
                timestamp: T0,
                signature: [0u8; 64],
            };
            request.signature = self.user.sign(&request.signing_bytes());
            request
        }

        fn create_at(&mut self, now: Timestamp) -> OperationId {
            let fee = self.coordinator.estimate_fee(false, false);
            let request = self.request(100, fee);
            self.coordinator.create_operation(&request, now).unwrap()
        }

        fn create(&mut self) -> OperationId {
            self.create_at(T0)
        }

        fn proof(&self, id: OperationId, ledger: LedgerId, root_time: Timestamp) -> ChainProof {
            let tree = SortedMerkleTree::from_leaves(vec![
                merkle::operation_leaf(&id),
                [0x11; 32],
                [0x22; 32],
            ]);
            let relayer = &self.relayers[&ledger];
            let mut proof = ChainProof {
                operation_id: id,
                ledger_id: ledger,
                claimed_leaf: None,
                merkle_root: tree.root(),
                sibling_path: tree.proof(0).unwrap(),
                block_reference: BlockReference::default(),
                timestamp: root_time,
                submitter: relayer.public_key(),
                submitter_signature: [0u8; 64],
            };
            proof.submitter_signature = relayer.sign(&proof.signing_bytes());
            proof
        }

        fn bad_proof(&self, id: OperationId, ledger: LedgerId) -> ChainProof {
            let mut proof = self.proof(id, ledger, T0);
            proof.merkle_root = [0x55; 32];
            proof.submitter_signature = self.relayers[&ledger].sign(&proof.signing_bytes());
            proof
        }

        fn submit(&mut self, id: OperationId, ledger: LedgerId, now: Timestamp) -> Result<ProofReceipt, CoordinatorError> {
            let proof = self.proof(id, ledger, now);
            self.coordinator.submit_proof(&proof, now)
        }

        fn cancel_request(&self, id: OperationId) -> CancelRequest {
            let mut request = CancelRequest {
                operation_id: id,
                initiator: self.user.public_key(),
                timestamp: T0,
                signature: [0u8; 64],
            };
            request.signature = self.user.sign(&request.signing_bytes());
            request
        }

        fn command(&self, action: ControllerAction, issued_at: Timestamp) -> ControllerCommand {
            let mut command = ControllerCommand {
                action,
                controller: self.controller.public_key(),
                issued_at,
                signature: [0u8; 64],
            };
            command.signature = self.controller.sign(&command.signing_bytes());
            command
        }

        fn status(&self, id: &OperationId) -> OperationStatus {
            self.coordinator.get_operation(id).unwrap().status
        }
    }

    #[test]
    fn test_two_of_three_executes_in_the_same_call() {
        let mut h = harness();
        let id = h.create();
        assert_eq!(h.coordinator.get_operation(&id).unwrap().fee, 1);

        let first = h.submit(id, LedgerId::Solana, T0).unwrap();
        assert_eq!(first.valid_proof_count, 1);
        assert_eq!(first.status, OperationStatus::Pending);
        assert!(!h.coordinator.has_consensus(&id).unwrap());

        let second = h.submit(id, LedgerId::Ton, T0).unwrap();
        assert_eq!(second.valid_proof_count, 2);
        assert_eq!(second.status, OperationStatus::Executed);
        assert!(second.executed);
        assert!(h.coordinator.has_consensus(&id).unwrap());

        // Third ledger is recorded but changes nothing else.
        let third = h.submit(id, LedgerId::Ethereum, T0).unwrap();
        assert_eq!(third.valid_proof_count, 3);
        assert_eq!(third.status, OperationStatus::Executed);
        assert!(!third.executed);

        assert_eq!(h.coordinator.escrow(), 0);
        assert_eq!(h.coordinator.current_epoch().fee_pool, 1);
        assert_eq!(h.coordinator.current_epoch().total_proof_count, 3);

        let events: Vec<_> = h
            .coordinator
            .events_since(0, 100)
            .into_iter()
            .map(|r| r.event)
            .collect();
        let executed_at = events
            .iter()
            .position(|e| matches!(e, CoordinatorEvent::OperationExecuted { .. }))
            .unwrap();
        assert!(matches!(
            events[executed_at - 1],
            CoordinatorEvent::ConsensusReached {
                valid_proof_count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_cancel_unit_fee_refunds_nothing() {
        let mut h = harness();
        let id = h.create();
        let receipt = h
            .coordinator
            .cancel_operation(&h.cancel_request(id), T0 + 10)
            .unwrap();
        assert_eq!(receipt.refund, 0);
        assert_eq!(receipt.penalty, 1);
        assert_eq!(receipt.refund + receipt.penalty, 1);
        assert_eq!(h.status(&id), OperationStatus::Cancelled);
        assert_eq!(h.coordinator.protocol_pool(), 1);

        assert!(matches!(
            h.submit(id, LedgerId::Solana, T0 + 20),
            Err(CoordinatorError::OperationTerminal {
                status: OperationStatus::Cancelled
            })
        ));
        assert!(!h.coordinator.has_consensus(&id).unwrap());
    }

    #[test]
    fn test_cancel_requires_initiator() {
        let mut h = harness();
        let id = h.create();
        let stranger = Keypair::from_seed(&[7u8; 32]);
        let mut request = h.cancel_request(id);
        request.initiator = stranger.public_key();
        request.signature = stranger.sign(&request.signing_bytes());
        assert_eq!(
            h.coordinator.cancel_operation(&request, T0),
            Err(CoordinatorError::NotInitiator)
        );
    }

    #[test]
    fn test_cancel_after_execution_is_rejected() {
        let mut h = harness();
        let id = h.create();
        h.submit(id, LedgerId::Solana, T0).unwrap();
        h.submit(id, LedgerId::Ton, T0).unwrap();
        assert!(matches!(
            h.coordinator.cancel_operation(&h.cancel_request(id), T0),
            Err(CoordinatorError::OperationTerminal {
                status: OperationStatus::Executed
            })
        ));
    }

    #[test]
    fn test_refused_refund_is_deferred_not_blocking() {
        let mut h = harness_with(params(10));
        let id = h.create();
        let user = h.user_address();
        h.coordinator.payouts_mut().refuse(user);

        let receipt = h
            .coordinator
            .cancel_operation(&h.cancel_request(id), T0)
            .unwrap();
        assert_eq!((receipt.refund, receipt.penalty), (8, 2));
        assert!(!receipt.refund_delivered);
        assert_eq!(h.status(&id), OperationStatus::Cancelled);
        assert_eq!(h.coordinator.deferred_payout(&user), 8);
        assert!(!h.coordinator.breaker_state().active);

        assert_eq!(h.coordinator.claim_deferred(&user).unwrap(), None);
        h.coordinator.payouts_mut().accept(&user);
        assert_eq!(h.coordinator.claim_deferred(&user).unwrap(), Some(8));
        assert_eq!(h.coordinator.payouts().balance(&user), 8);
        assert_eq!(
            h.coordinator.claim_deferred(&user),
            Err(CoordinatorError::NothingDeferred)
        );
    }

    #[test]
    fn test_duplicate_ledger_proof_is_not_counted() {
        let mut h = harness();
        let id = h.create();
        h.submit(id, LedgerId::Solana, T0).unwrap();
        assert_eq!(
            h.submit(id, LedgerId::Solana, T0 + 1),
            Err(CoordinatorError::DuplicateLedgerProof {
                ledger: LedgerId::Solana
            })
        );
        let operation = h.coordinator.get_operation(&id).unwrap();
        assert_eq!(operation.valid_proof_count(), 1);
        assert_eq!(operation.status, OperationStatus::Pending);
    }

    #[test]
    fn test_expired_operation_cannot_execute() {
        let mut h = harness();
        let id = h.create();
        h.submit(id, LedgerId::Solana, T0).unwrap();

        let deadline = T0 + 3_600;
        assert_eq!(
            h.submit(id, LedgerId::Ton, deadline),
            Err(CoordinatorError::OperationExpired {
                expired_at: deadline
            })
        );
        assert_eq!(h.status(&id), OperationStatus::Expired);
        assert!(!h.coordinator.has_consensus(&id).unwrap());
        // The whole fee comes back.
        assert_eq!(h.coordinator.payouts().balance(&h.user_address()), 1);
        assert_eq!(h.coordinator.escrow(), 0);

        assert!(matches!(
            h.submit(id, LedgerId::Ethereum, deadline + 1),
            Err(CoordinatorError::OperationTerminal {
                status: OperationStatus::Expired
            })
        ));
    }

    #[test]
    fn test_tier3_sweeps_expired_operations() {
        let mut p = params(1);
        p.tiers.tier3_interval = 1;
        let mut h = harness_with(p);
        let id = h.create();
        assert_eq!(h.coordinator.pending_operations(), 1);

        assert!(h.coordinator.on_tick(T0 + 100).unwrap());
        assert_eq!(h.status(&id), OperationStatus::Pending);

        h.coordinator.on_tick(T0 + 3_600).unwrap();
        assert_eq!(h.status(&id), OperationStatus::Expired);
        assert_eq!(h.coordinator.pending_operations(), 0);
    }

    #[test]
    fn test_stale_and_future_roots_are_rejected() {
        let mut h = harness();
        let id = h.create();
        let stale = h.proof(id, LedgerId::Solana, T0 - 86_401);
        assert_eq!(
            h.coordinator.submit_proof(&stale, T0),
            Err(CoordinatorError::StaleMerkleRoot {
                age: 86_401,
                max: 86_400
            })
        );
        let future = h.proof(id, LedgerId::Solana, T0 + 301);
        assert!(matches!(
            h.coordinator.submit_proof(&future, T0),
            Err(CoordinatorError::TimestampTooFuture { .. })
        ));
        // Policy rejections do not feed the failure-rate detector.
        assert_eq!(h.coordinator.detector_stats(T0).total_proofs, 0);
    }

    #[test]
    fn test_leaf_substitution_is_rejected() {
        let mut h = harness();
        let id = h.create();
        let mut proof = h.proof(id, LedgerId::Solana, T0);
        proof.claimed_leaf = Some([0x11; 32]);
        proof.submitter_signature = h.relayers[&LedgerId::Solana].sign(&proof.signing_bytes());
        let err = h.coordinator.submit_proof(&proof, T0).unwrap_err();
        assert_eq!(err, CoordinatorError::LeafMismatch);
        assert_eq!(err.kind(), ErrorKind::InvalidProof);
        assert_eq!(h.coordinator.get_operation(&id).unwrap().valid_proof_count(), 0);
        assert_eq!(h.coordinator.detector_stats(T0).failed_proofs, 1);
    }

    #[test]
    fn test_proof_must_come_from_ledger_relayer() {
        let mut h = harness();
        let id = h.create();
        let mut proof = h.proof(id, LedgerId::Solana, T0);
        proof.ledger_id = LedgerId::Ton;
        proof.submitter_signature = h.relayers[&LedgerId::Solana].sign(&proof.signing_bytes());
        assert_eq!(
            h.coordinator.submit_proof(&proof, T0),
            Err(CoordinatorError::UnauthorizedRelayer {
                ledger: LedgerId::Ton
            })
        );
    }

    #[test]
    fn test_create_validation() {
        let mut h = harness();
        let request = h.request(0, 1);
        assert!(matches!(
            h.coordinator.create_operation(&request, T0),
            Err(CoordinatorError::AmountOutOfBounds { .. })
        ));

        let request = h.request(100, 0);
        assert_eq!(
            h.coordinator.create_operation(&request, T0),
            Err(CoordinatorError::InsufficientFee { paid: 0, fee: 1 })
        );

        let mut request = h.request(100, 1);
        request.duration = 1;
        request.signature = h.user.sign(&request.signing_bytes());
        assert!(matches!(
            h.coordinator.create_operation(&request, T0),
            Err(CoordinatorError::DurationOutOfBounds { .. })
        ));

        let mut request = h.request(100, 1);
        request.destination_ledger = LedgerId::Ethereum;
        request.signature = h.user.sign(&request.signing_bytes());
        assert_eq!(
            h.coordinator.create_operation(&request, T0),
            Err(CoordinatorError::SameLedger {
                ledger: LedgerId::Ethereum
            })
        );

        let mut request = h.request(100, 1);
        request.amount = 101;
        assert_eq!(
            h.coordinator.create_operation(&request, T0),
            Err(CoordinatorError::InvalidSignature)
        );
        assert_eq!(h.coordinator.pending_operations(), 0);
    }

    #[test]
    fn test_excess_payment_is_refunded() {
        let mut h = harness();
        let request = h.request(100, 10);
        h.coordinator.create_operation(&request, T0).unwrap();
        assert_eq!(h.coordinator.payouts().balance(&h.user_address()), 9);
        assert_eq!(h.coordinator.escrow(), 1);
    }

    #[test]
    fn test_identical_requests_get_distinct_ids() {
        let mut h = harness();
        let a = h.create();
        let b = h.create();
        assert_ne!(a, b);
        assert_eq!(h.coordinator.get_operation(&b).unwrap().sequence, 1);
    }

    #[test]
    fn test_initiator_rate_limit() {
        let mut p = params(1);
        p.operations.initiator_burst = 2;
        p.operations.initiator_refill_interval = 60;
        let mut h = harness_with(p);
        h.create();
        h.create();
        let request = h.request(100, 1);
        let err = h.coordinator.create_operation(&request, T0).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Sentinel(SentinelError::RateLimitExceeded { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::RejectedByPolicy);
        assert!(h.coordinator.create_operation(&request, T0 + 60).is_ok());
    }

    #[test]
    fn test_emergency_pause_fails_closed() {
        let mut h = harness();
        let id = h.create();
        let pause = h.command(
            ControllerAction::Pause {
                reason: "incident".into(),
            },
            T0,
        );
        h.coordinator.apply_controller_command(&pause, T0).unwrap();

        let request = h.request(100, 1);
        let err = h.coordinator.create_operation(&request, T0 + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);
        let err = h.submit(id, LedgerId::Solana, T0 + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);
        // Long after any cooldown the pause still holds.
        let err = h.submit(id, LedgerId::Solana, T0 + 3_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);

        let resume = h.command(ControllerAction::Resume, T0 + 3_000);
        h.coordinator.apply_controller_command(&resume, T0 + 3_000).unwrap();
        assert!(h.submit(id, LedgerId::Solana, T0 + 3_001).is_ok());
    }

    #[test]
    fn test_invalid_proof_flood_trips_breaker() {
        let mut p = params(1);
        p.tiers.tier2_interval = 1;
        let mut h = harness_with(p);
        let id = h.create();

        for _ in 0..19 {
            let proof = h.bad_proof(id, LedgerId::Solana);
            assert_eq!(
                h.coordinator.submit_proof(&proof, T0),
                Err(CoordinatorError::InvalidProof)
            );
            assert!(!h.coordinator.breaker_state().active);
        }
        let proof = h.bad_proof(id, LedgerId::Solana);
        assert_eq!(
            h.coordinator.submit_proof(&proof, T0),
            Err(CoordinatorError::InvalidProof)
        );
        assert!(h.coordinator.breaker_state().active);
        assert!(h
            .coordinator
            .events_since(0, 100)
            .iter()
            .any(|r| matches!(r.event, CoordinatorEvent::CircuitBreakerTripped { .. })));

        // Fail closed, even for valid input.
        let err = h.submit(id, LedgerId::Solana, T0 + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);
        let request = h.request(100, 1);
        let err = h.coordinator.create_operation(&request, T0 + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitBreaker);

        // Once the cooldown has passed and the failures aged out, it recovers.
        assert!(h.coordinator.create_operation(&request, T0 + 3_600).is_ok());
        assert!(!h.coordinator.breaker_state().active);
    }

    #[test]
    fn test_epoch_rewards_are_claimed_by_submitters() {
        let mut h = harness_with(params(1_000));
        let id = h.create();
        h.submit(id, LedgerId::Ethereum, T0).unwrap();
        h.submit(id, LedgerId::Solana, T0).unwrap();

        let eth = h.relayers[&LedgerId::Ethereum].public_key();
        assert_eq!(
            h.coordinator.claim_epoch_reward(0, &eth, T0 + 1),
            Err(CoordinatorError::EpochNotSettled { epoch_id: 0 })
        );

        h.coordinator.on_tick(T0 + 3_600).unwrap();
        assert_eq!(h.coordinator.current_epoch().epoch_id, 1);
        assert_eq!(h.coordinator.protocol_pool(), 200);

        assert_eq!(h.coordinator.claim_epoch_reward(0, &eth, T0 + 3_601).unwrap(), 400);
        assert_eq!(
            h.coordinator.payouts().balance(&pubkey_to_address(&eth)),
            400
        );
        assert_eq!(
            h.coordinator.claim_epoch_reward(0, &eth, T0 + 3_602),
            Err(CoordinatorError::NothingToClaim { epoch_id: 0 })
        );
        let ton = h.relayers[&LedgerId::Ton].public_key();
        assert_eq!(
            h.coordinator.claim_epoch_reward(0, &ton, T0 + 3_602),
            Err(CoordinatorError::NothingToClaim { epoch_id: 0 })
        );

        let sol = h.relayers[&LedgerId::Solana].public_key();
        h.coordinator.claim_epoch_reward(0, &sol, T0 + 3_603).unwrap();
        assert!(h.coordinator.epoch(0).unwrap().distributed);
        assert!(h.coordinator.halt_reason().is_none());
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn threshold_is_monotonic_and_bounded(ledgers in proptest::collection::vec(0usize..3, 1..10)) {
                let mut h = harness();
                let id = h.create();
                let mut last = 0;
                for index in ledgers {
                    let _ = h.submit(id, LedgerId::ALL[index], T0);
                    let operation = h.coordinator.get_operation(&id).unwrap();
                    let count = operation.valid_proof_count();
                    prop_assert!(count >= last);
                    prop_assert!(count <= 3);
                    prop_assert_eq!(operation.has_consensus(), count >= 2);
                    prop_assert_eq!(operation.status == OperationStatus::Executed, count >= 2);
                    last = count;
                }
            }
        }
    }
}
