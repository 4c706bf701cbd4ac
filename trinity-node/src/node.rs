use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use trinity_coordinator::coordinator::CoordinatorConfig;
use trinity_coordinator::error::ErrorKind;
use trinity_crypto::keys::Keypair;
use trinity_relayer::client::CoordinatorClient;
use trinity_relayer::lane::RelayOutcome;
use trinity_relayer::relay::{Relayer, RelayerHandle};
use trinity_storage::memory::MemoryStore;
use trinity_storage::relayer_store::RelayerStore;
use trinity_storage::sqlite::SqliteStore;
use trinity_storage::traits::KvStore;
use trinity_types::event::CoordinatorEvent;
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::short_hex;

use crate::config::{load_keypair, NodeConfig};
use crate::error::NodeError;
use crate::host::{system_clock, Clock, HostLedger};
use crate::metrics::NodeMetrics;
use crate::simulator::SimulatedValidator;

type Store = Arc<dyn KvStore>;

/// Events read from the coordinator log per pass.
const EVENT_BATCH: usize = 256;

/// A coordinator host with its relayer, ticking until shut down.
pub struct Node {
    config: NodeConfig,
    host: Arc<HostLedger>,
    metrics: Arc<NodeMetrics>,
    store: Arc<RelayerStore<Store>>,
    relayer: Option<Relayer<HostLedger, Store>>,
    relayer_handle: Option<RelayerHandle>,
    outcome_task: Option<JoinHandle<()>>,
    /// Next coordinator event to feed into metrics.
    event_cursor: u64,
}

/// Create a storage backend from the node configuration.
fn create_store(config: &NodeConfig) -> Result<Store, NodeError> {
    match config.storage.db_type.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sqlite" => {
            let data_dir = std::path::Path::new(&config.storage.data_dir);
            std::fs::create_dir_all(data_dir)?;
            let store = SqliteStore::open(data_dir.join("relayer.db"))?;
            Ok(Arc::new(store))
        }
        other => Err(NodeError::ConfigError {
            reason: format!(
                "unknown storage backend '{}', expected 'memory' or 'sqlite'",
                other
            ),
        }),
    }
}

impl Node {
    /// Create a new node from the given configuration.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        Self::with_clock(config, system_clock()).await
    }

    /// Create a node whose coordinator reads time from `clock`.
    pub async fn with_clock(config: NodeConfig, clock: Clock) -> Result<Self, NodeError> {
        let params = config.protocol_params()?;
        let controller = load_keypair(config.keys.controller_seed.as_deref(), "controller")?;
        let mut relayer_keys: BTreeMap<LedgerId, Keypair> = BTreeMap::new();
        for ledger in LedgerId::ALL {
            let what = format!("{} relayer", ledger);
            let keypair = load_keypair(config.keys.relayer_seed(ledger), &what)?;
            relayer_keys.insert(ledger, keypair);
        }

        let metrics = Arc::new(NodeMetrics::new());
        let coordinator_config = CoordinatorConfig {
            params,
            controller: controller.public_key(),
            relayers: relayer_keys
                .iter()
                .map(|(ledger, kp)| (*ledger, BTreeSet::from([kp.public_key()])))
                .collect(),
            genesis_time: clock(),
        };
        let host = Arc::new(HostLedger::new(
            coordinator_config,
            config.host.submission_fee,
            clock,
            metrics.clone(),
        )?);

        let store = Arc::new(RelayerStore::new(create_store(&config)?));
        // The in-process coordinator starts with an empty log, so cursors
        // left by a previous run point past its head, and the operations the
        // relayer still tracks no longer exist.
        let head = host.read(|c| c.next_event_seq()).await;
        let mut stale = false;
        for ledger in LedgerId::ALL {
            if let Some(cursor) = store.cursor(ledger)? {
                if cursor >= head {
                    tracing::warn!(%ledger, cursor, head, "event cursor ahead of the coordinator log, resetting");
                    store.clear_cursor(ledger)?;
                    stale = true;
                }
            }
        }
        if stale {
            let dropped = store.clear_operations()?;
            if dropped > 0 {
                tracing::warn!(dropped, "dropped relayer records of a previous coordinator");
            }
        }

        if config.network_id != "dev" {
            tracing::warn!(
                network = %config.network_id,
                "ledger validators are simulated in-process"
            );
        }
        let mut relayer = Relayer::new(config.relayer.clone(), host.clone(), store.clone());
        for source in SimulatedValidator::all(&host) {
            relayer = relayer.with_source(source);
        }
        for (ledger, keypair) in relayer_keys {
            relayer = relayer.with_key(ledger, keypair);
        }

        tracing::info!(
            network = %config.network_id,
            storage = %config.storage.db_type,
            controller = %short_hex(&controller.public_key()),
            "node initialized"
        );
        Ok(Self {
            config,
            host,
            metrics,
            store,
            relayer: Some(relayer),
            relayer_handle: None,
            outcome_task: None,
            event_cursor: 0,
        })
    }

    /// Run until Ctrl+C.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        tracing::info!("Node is running. Press Ctrl+C to stop.");
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {}", e);
            }
        })
        .await
    }

    /// Run the main loop until `stop` resolves, then shut down.
    pub async fn run_until(&mut self, stop: impl Future<Output = ()>) -> Result<(), NodeError> {
        self.start_relayer()?;

        let mut tick = tokio::time::interval(Duration::from_millis(self.config.host.tick_interval_ms));
        let mut export =
            tokio::time::interval(Duration::from_secs(self.config.metrics.interval_secs.max(1)));
        let exporting = self.config.metrics.enabled && self.config.metrics.textfile.is_some();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick().await,
                _ = export.tick(), if exporting => self.export_metrics(),
                _ = &mut stop => {
                    tracing::info!("Shutting down...");
                    break;
                }
            }
        }
        self.shutdown().await
    }

    fn start_relayer(&mut self) -> Result<(), NodeError> {
        let Some(relayer) = self.relayer.take() else {
            return Ok(());
        };
        let mut handle = relayer.spawn()?;
        if let Some(mut outcomes) = handle.take_outcomes() {
            let metrics = self.metrics.clone();
            self.outcome_task = Some(tokio::spawn(async move {
                while let Some(outcome) = outcomes.recv().await {
                    metrics.observe_outcome(&outcome);
                    log_outcome(&outcome);
                }
            }));
        }
        self.relayer_handle = Some(handle);
        Ok(())
    }

    async fn on_tick(&mut self) {
        if let Err(e) = self.host.tick().await {
            if e.kind() == ErrorKind::Halted || e.kind() == ErrorKind::Accounting {
                tracing::error!(error = %e, "coordinator halted");
            } else {
                tracing::warn!(error = %e, "coordinator tick failed");
            }
        }
        self.observe_events().await;

        let (breaker_active, pending) = self
            .host
            .read(|c| (c.breaker_state().active, c.pending_operations()))
            .await;
        self.metrics.breaker_active.set(breaker_active as i64);
        self.metrics.pending_operations.set(pending as i64);
    }

    /// Feed new coordinator events into metrics and drop relayer records of
    /// finished operations.
    async fn observe_events(&mut self) {
        loop {
            let records = match self.host.events_since(self.event_cursor, EVENT_BATCH).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read coordinator events");
                    return;
                }
            };
            for record in &records {
                self.metrics.observe_event(&record.event);
                let finished = match &record.event {
                    CoordinatorEvent::OperationExecuted { operation_id, .. }
                    | CoordinatorEvent::OperationCancelled { operation_id, .. }
                    | CoordinatorEvent::OperationExpired { operation_id } => Some(operation_id),
                    _ => None,
                };
                if let Some(id) = finished {
                    if let Err(e) = self.store.forget_operation(id) {
                        tracing::warn!(operation = %short_hex(id), error = %e, "failed to drop submission records");
                    }
                }
                self.event_cursor = record.seq + 1;
            }
            if records.len() < EVENT_BATCH {
                return;
            }
        }
    }

    fn export_metrics(&self) {
        let Some(path) = &self.config.metrics.textfile else {
            return;
        };
        if !self.config.metrics.enabled {
            return;
        }
        match self.metrics.encode() {
            Ok(text) => {
                if let Err(e) = std::fs::write(path, text) {
                    tracing::warn!(path = %path, error = %e, "failed to write metrics");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode metrics"),
        }
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&mut self) -> Result<(), NodeError> {
        if let Some(handle) = self.relayer_handle.take() {
            handle.shutdown().await;
        }
        if let Some(task) = self.outcome_task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "outcome consumer ended abnormally");
            }
        }
        self.export_metrics();
        tracing::info!("Node shutdown complete");
        Ok(())
    }

    pub fn host(&self) -> &Arc<HostLedger> {
        &self.host
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn relayer_store(&self) -> &Arc<RelayerStore<Store>> {
        &self.store
    }
}

fn log_outcome(outcome: &RelayOutcome) {
    let operation = short_hex(outcome.operation_id());
    let ledger = outcome.ledger();
    match outcome {
        RelayOutcome::Submitted { nonce, receipt, .. } => tracing::info!(
            %operation,
            %ledger,
            nonce,
            proofs = receipt.valid_proof_count,
            executed = receipt.executed,
            "proof relayed"
        ),
        RelayOutcome::Failed { attempts, error, .. } => tracing::error!(
            %operation,
            %ledger,
            attempts,
            error = %error,
            "proof relay failed"
        ),
        RelayOutcome::AlreadyConfirmed { .. } | RelayOutcome::Skipped { .. } => tracing::debug!(
            %operation,
            %ledger,
            outcome = outcome.label(),
            "proof not needed"
        ),
    }
}
