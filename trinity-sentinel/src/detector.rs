use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;

use trinity_types::breaker::TripReason;
use trinity_types::network::{BreakerParams, TierParams};
use trinity_types::primitives::{Amount, Timestamp};

/// Accepted and failed proofs observed at one timestamp.
#[derive(Debug, Clone, Copy)]
struct ProofSample {
    at: Timestamp,
    accepted: u64,
    failed: u64,
}

/// Rolling counters read by the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub current_volume: Amount,
    pub baseline_volume: Amount,
    pub failed_proofs: u64,
    pub total_proofs: u64,
    pub ops_in_window: u64,
    pub state_changes: u64,
    pub ticks: u64,
}

/// Windowed traffic counters with tiered evaluation.
///
/// Tier 1 (binding, signature, breaker) lives with the caller because it needs
/// request context. This type owns tiers 2 and 3: `on_state_change` runs the
/// rolling checks every `tier2_interval` calls, `on_tick` prunes every
/// `tier3_interval` ticks.
pub struct AnomalyDetector {
    params: BreakerParams,
    tiers: TierParams,
    /// (window index, volume) for the current and trailing windows, oldest first.
    volume: VecDeque<(u64, Amount)>,
    proofs: VecDeque<ProofSample>,
    /// (timestamp, operations created) oldest first.
    ops: VecDeque<(Timestamp, u64)>,
    state_changes: u64,
    ticks: u64,
}

impl AnomalyDetector {
    pub fn new(params: BreakerParams, tiers: TierParams) -> Self {
        Self {
            params,
            tiers,
            volume: VecDeque::new(),
            proofs: VecDeque::new(),
            ops: VecDeque::new(),
            state_changes: 0,
            ticks: 0,
        }
    }

    fn window_of(&self, now: Timestamp) -> u64 {
        now / self.params.volume_window
    }

    /// Record a newly created operation.
    pub fn record_operation(&mut self, amount: Amount, now: Timestamp) {
        let window = self.window_of(now);
        match self.volume.back_mut() {
            Some((w, v)) if *w == window => *v = v.saturating_add(amount),
            _ => self.volume.push_back((window, amount)),
        }
        match self.ops.back_mut() {
            Some((at, count)) if *at == now => *count += 1,
            _ => self.ops.push_back((now, 1)),
        }
    }

    /// Record the outcome of a proof verification.
    pub fn record_proof(&mut self, accepted: bool, now: Timestamp) {
        if !matches!(self.proofs.back(), Some(sample) if sample.at == now) {
            self.proofs.push_back(ProofSample {
                at: now,
                accepted: 0,
                failed: 0,
            });
        }
        if let Some(sample) = self.proofs.back_mut() {
            if accepted {
                sample.accepted += 1;
            } else {
                sample.failed += 1;
            }
        }
    }

    /// Count a state-changing call; every `tier2_interval` calls, run the
    /// rolling checks and return the first tripped condition.
    pub fn on_state_change(&mut self, now: Timestamp) -> Option<TripReason> {
        self.state_changes += 1;
        if self.state_changes % self.tiers.tier2_interval != 0 {
            return None;
        }
        self.evaluate(now)
    }

    /// Count a tick; every `tier3_interval` ticks prune the windows and return
    /// true so the caller runs its own maintenance.
    pub fn on_tick(&mut self, now: Timestamp) -> bool {
        self.ticks += 1;
        if self.ticks % self.tiers.tier3_interval != 0 {
            return false;
        }
        self.prune(now);
        true
    }

    /// Tier-2 checks, regardless of the call counter.
    pub fn evaluate(&self, now: Timestamp) -> Option<TripReason> {
        let stats = self.stats(now);
        debug!(
            current = %stats.current_volume,
            baseline = %stats.baseline_volume,
            failed = stats.failed_proofs,
            total = stats.total_proofs,
            ops = stats.ops_in_window,
            "tier-2 evaluation"
        );

        if stats.baseline_volume > 0 {
            let ratio = stats.current_volume.saturating_mul(100) / stats.baseline_volume;
            let ratio_pct = u64::try_from(ratio).unwrap_or(u64::MAX);
            if ratio_pct > self.params.volume_spike_ratio_pct {
                return Some(TripReason::VolumeSpike { ratio_pct });
            }
        }

        if stats.total_proofs > 0
            && stats.total_proofs >= self.params.min_failure_samples
            && stats.failed_proofs.saturating_mul(100) / stats.total_proofs
                > self.params.failure_rate_pct
        {
            return Some(TripReason::ProofFailureRate {
                failed: stats.failed_proofs,
                total: stats.total_proofs,
            });
        }

        if stats.ops_in_window > self.params.max_ops_per_window {
            return Some(TripReason::OperationBurst {
                count: stats.ops_in_window,
            });
        }

        None
    }

    pub fn stats(&self, now: Timestamp) -> DetectorStats {
        let window = self.window_of(now);
        let baseline_windows = self.params.baseline_windows.max(1) as u64;
        let oldest = window.saturating_sub(baseline_windows);

        let mut current_volume = 0;
        let mut trailing: Amount = 0;
        for (w, v) in &self.volume {
            if *w == window {
                current_volume = *v;
            } else if *w >= oldest && *w < window {
                trailing = trailing.saturating_add(*v);
            }
        }

        let failure_cutoff = now.saturating_sub(self.params.failure_window);
        let (mut failed_proofs, mut total_proofs) = (0, 0);
        for sample in self.proofs.iter().filter(|s| s.at > failure_cutoff) {
            failed_proofs += sample.failed;
            total_proofs += sample.accepted + sample.failed;
        }

        let ops_cutoff = now.saturating_sub(self.params.ops_window);
        let ops_in_window = self
            .ops
            .iter()
            .filter(|(at, _)| *at > ops_cutoff)
            .map(|(_, count)| count)
            .sum();

        DetectorStats {
            current_volume,
            baseline_volume: trailing / baseline_windows as Amount,
            failed_proofs,
            total_proofs,
            ops_in_window,
            state_changes: self.state_changes,
            ticks: self.ticks,
        }
    }

    /// Drop samples that no longer fall in any window.
    pub fn prune(&mut self, now: Timestamp) {
        let oldest_window = self
            .window_of(now)
            .saturating_sub(self.params.baseline_windows as u64);
        while matches!(self.volume.front(), Some((w, _)) if *w < oldest_window) {
            self.volume.pop_front();
        }
        let failure_cutoff = now.saturating_sub(self.params.failure_window);
        while matches!(self.proofs.front(), Some(s) if s.at <= failure_cutoff) {
            self.proofs.pop_front();
        }
        let ops_cutoff = now.saturating_sub(self.params.ops_window);
        while matches!(self.ops.front(), Some((at, _)) if *at <= ops_cutoff) {
            self.ops.pop_front();
        }
    }

    /// Number of retained samples across all windows.
    pub fn retained_samples(&self) -> usize {
        self.volume.len() + self.proofs.len() + self.ops.len()
    }
}
