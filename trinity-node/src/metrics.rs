use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use trinity_relayer::lane::RelayOutcome;
use trinity_types::event::CoordinatorEvent;

/// Node-wide Prometheus metrics.
pub struct NodeMetrics {
    pub operations_created: Counter,
    pub operations_executed: Counter,
    pub operations_cancelled: Counter,
    pub operations_expired: Counter,
    pub proofs_accepted: Counter,
    pub proofs_rejected: Counter,
    pub breaker_trips: Counter,
    pub payouts_deferred: Counter,
    pub relay_submissions: Counter,
    pub relay_failures: Counter,
    pub breaker_active: Gauge,
    pub pending_operations: Gauge,
    pub registry: Registry,
}

impl NodeMetrics {
    /// Create a new metrics registry with all node metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let operations_created = Counter::default();
        let operations_executed = Counter::default();
        let operations_cancelled = Counter::default();
        let operations_expired = Counter::default();
        let proofs_accepted = Counter::default();
        let proofs_rejected = Counter::default();
        let breaker_trips = Counter::default();
        let payouts_deferred = Counter::default();
        let relay_submissions = Counter::default();
        let relay_failures = Counter::default();
        let breaker_active = Gauge::default();
        let pending_operations = Gauge::default();

        registry.register(
            "trinity_operations_created",
            "Operations opened on the coordinator",
            operations_created.clone(),
        );
        registry.register(
            "trinity_operations_executed",
            "Operations executed after reaching 2-of-3 consensus",
            operations_executed.clone(),
        );
        registry.register(
            "trinity_operations_cancelled",
            "Operations cancelled by their initiator",
            operations_cancelled.clone(),
        );
        registry.register(
            "trinity_operations_expired",
            "Operations that expired before consensus",
            operations_expired.clone(),
        );
        registry.register(
            "trinity_proofs_accepted",
            "Ledger proofs accepted by the coordinator",
            proofs_accepted.clone(),
        );
        registry.register(
            "trinity_proofs_rejected",
            "Proof submissions refused by the coordinator",
            proofs_rejected.clone(),
        );
        registry.register(
            "trinity_breaker_trips",
            "Circuit breaker trips",
            breaker_trips.clone(),
        );
        registry.register(
            "trinity_payouts_deferred",
            "Payouts deferred after a refused transfer",
            payouts_deferred.clone(),
        );
        registry.register(
            "trinity_relay_submissions",
            "Proofs submitted by the relayer",
            relay_submissions.clone(),
        );
        registry.register(
            "trinity_relay_failures",
            "Proofs the relayer gave up on",
            relay_failures.clone(),
        );
        registry.register(
            "trinity_breaker_active",
            "1 while the circuit breaker is open",
            breaker_active.clone(),
        );
        registry.register(
            "trinity_pending_operations",
            "Operations awaiting consensus",
            pending_operations.clone(),
        );

        Self {
            operations_created,
            operations_executed,
            operations_cancelled,
            operations_expired,
            proofs_accepted,
            proofs_rejected,
            breaker_trips,
            payouts_deferred,
            relay_submissions,
            relay_failures,
            breaker_active,
            pending_operations,
            registry,
        }
    }

    /// Count a coordinator event.
    pub fn observe_event(&self, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::OperationCreated { .. } => self.operations_created.inc(),
            CoordinatorEvent::ProofSubmitted { .. } => self.proofs_accepted.inc(),
            CoordinatorEvent::OperationExecuted { .. } => self.operations_executed.inc(),
            CoordinatorEvent::OperationCancelled { .. } => self.operations_cancelled.inc(),
            CoordinatorEvent::OperationExpired { .. } => self.operations_expired.inc(),
            CoordinatorEvent::PayoutDeferred { .. } => self.payouts_deferred.inc(),
            CoordinatorEvent::CircuitBreakerTripped { .. } => self.breaker_trips.inc(),
            _ => return,
        };
    }

    pub fn observe_outcome(&self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Submitted { .. } => {
                self.relay_submissions.inc();
            }
            RelayOutcome::Failed { .. } => {
                self.relay_failures.inc();
            }
            RelayOutcome::AlreadyConfirmed { .. } | RelayOutcome::Skipped { .. } => {}
        }
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
