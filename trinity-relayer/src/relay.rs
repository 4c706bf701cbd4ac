use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use trinity_crypto::keys::Keypair;
use trinity_storage::relayer_store::RelayerStore;
use trinity_storage::traits::KvStore;
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::{short_hex, OperationId, PublicKey};
use trinity_types::proof::{ChainProof, ProofMaterial};

use crate::client::{CoordinatorClient, ProofSource};
use crate::config::RelayerConfig;
use crate::error::{ClientError, RelayerError};
use crate::lane::{RelayOutcome, SubmissionLane};
use crate::watcher::{NewOperation, Watcher};

/// Turns detected operations into queued proofs.
struct Fetcher<S: KvStore> {
    store: Arc<RelayerStore<S>>,
    sources: BTreeMap<LedgerId, Arc<dyn ProofSource>>,
    lanes: BTreeMap<LedgerId, mpsc::Sender<ChainProof>>,
    submitters: BTreeMap<LedgerId, PublicKey>,
    outcomes: mpsc::Sender<RelayOutcome>,
    config: RelayerConfig,
}

impl<S: KvStore> Fetcher<S> {
    /// Fetch `ledger`'s proof for `operation_id` and queue it on that
    /// ledger's lane. Each query is bounded by the fetch timeout and retried
    /// with the relayer's backoff.
    async fn fetch_and_queue(&self, operation_id: OperationId, ledger: LedgerId) {
        let (Some(source), Some(lane), Some(submitter)) = (
            self.sources.get(&ledger),
            self.lanes.get(&ledger),
            self.submitters.get(&ledger),
        ) else {
            warn!(%ledger, "ledger not wired, dropping proof request");
            return;
        };

        let material = match self.fetch(source.as_ref(), &operation_id).await {
            Ok(material) => material,
            Err((attempts, e)) => {
                error!(
                    %ledger,
                    operation = %short_hex(&operation_id),
                    attempts,
                    error = %e,
                    "proof fetch failed, operator attention required"
                );
                if let Err(e) = self.store.complete_proof(&operation_id, ledger) {
                    warn!(%ledger, error = %e, "failed to clear owed proof");
                }
                let failed = RelayOutcome::Failed {
                    operation_id,
                    ledger,
                    attempts,
                    error: e.to_string(),
                };
                if self.outcomes.send(failed).await.is_err() {
                    debug!("outcome receiver dropped");
                }
                return;
            }
        };

        let proof = ChainProof::from_material(operation_id, ledger, material, *submitter);
        if lane.send(proof).await.is_err() {
            warn!(%ledger, operation = %short_hex(&operation_id), "submission lane closed");
        }
    }

    async fn fetch(
        &self,
        source: &dyn ProofSource,
        operation_id: &OperationId,
    ) -> Result<ProofMaterial, (u32, ClientError)> {
        let mut failures = 0u32;
        loop {
            let result = match timeout(self.config.fetch_timeout(), source.fetch_proof(operation_id)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout {
                    ms: self.config.fetch_timeout_ms,
                }),
            };
            match result {
                Ok(material) => return Ok(material),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if !self.config.retry.allows(failures) {
                        return Err((failures, e));
                    }
                    let delay = self.config.retry.delay_for_attempt(failures - 1);
                    debug!(
                        ledger = %source.ledger(),
                        operation = %short_hex(operation_id),
                        attempt = failures,
                        error = %e,
                        "proof fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err((failures + 1, e)),
            }
        }
    }
}

/// Receives a watcher's operations and starts one fetch task per proving
/// ledger.
async fn dispatch<S: KvStore + 'static>(fetcher: Arc<Fetcher<S>>, mut operations: mpsc::Receiver<NewOperation>) {
    while let Some(op) = operations.recv().await {
        for ledger in op.source_ledger.others() {
            let fetcher = fetcher.clone();
            tokio::spawn(async move {
                fetcher.fetch_and_queue(op.operation_id, ledger).await;
            });
        }
    }
}

/// The relayer: three watchers, a fetch fan-out per new operation, and one
/// serialized submission lane per ledger.
pub struct Relayer<C, S: KvStore> {
    config: RelayerConfig,
    client: Arc<C>,
    store: Arc<RelayerStore<S>>,
    sources: BTreeMap<LedgerId, Arc<dyn ProofSource>>,
    keys: BTreeMap<LedgerId, Keypair>,
}

impl<C, S> Relayer<C, S>
where
    C: CoordinatorClient + 'static,
    S: KvStore + 'static,
{
    pub fn new(config: RelayerConfig, client: Arc<C>, store: Arc<RelayerStore<S>>) -> Self {
        Self {
            config,
            client,
            store,
            sources: BTreeMap::new(),
            keys: BTreeMap::new(),
        }
    }

    /// Register the validator endpoint of the source's ledger.
    pub fn with_source(mut self, source: Arc<dyn ProofSource>) -> Self {
        self.sources.insert(source.ledger(), source);
        self
    }

    /// Register the key proofs for `ledger` are submitted under.
    pub fn with_key(mut self, ledger: LedgerId, keypair: Keypair) -> Self {
        self.keys.insert(ledger, keypair);
        self
    }

    /// Start every task. Requires a source and a key for all three ledgers.
    pub fn spawn(mut self) -> Result<RelayerHandle, RelayerError> {
        for ledger in LedgerId::ALL {
            if !self.sources.contains_key(&ledger) {
                return Err(RelayerError::MissingSource { ledger });
            }
            if !self.keys.contains_key(&ledger) {
                return Err(RelayerError::MissingKey { ledger });
            }
        }

        let capacity = self.config.channel_capacity;
        let (outcome_tx, outcome_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let mut lanes = BTreeMap::new();
        let mut submitters = BTreeMap::new();
        for ledger in LedgerId::ALL {
            let keypair = self
                .keys
                .remove(&ledger)
                .ok_or(RelayerError::MissingKey { ledger })?;
            submitters.insert(ledger, keypair.public_key());
            let (tx, rx) = mpsc::channel(capacity);
            lanes.insert(ledger, tx);
            let lane = SubmissionLane::new(
                ledger,
                self.client.clone(),
                self.store.clone(),
                keypair,
                self.config.clone(),
            );
            tasks.push(tokio::spawn(lane.run(rx, outcome_tx.clone())));
        }

        let fetcher = Arc::new(Fetcher {
            store: self.store.clone(),
            sources: std::mem::take(&mut self.sources),
            lanes,
            submitters,
            outcomes: outcome_tx,
            config: self.config.clone(),
        });

        // Proofs owed from before a restart are fetched again; the lanes'
        // idempotency checks absorb the ones that did land.
        let owed = self.store.pending_proofs()?;
        if !owed.is_empty() {
            info!(count = owed.len(), "replaying owed proofs");
        }
        for pending in owed {
            let fetcher = fetcher.clone();
            tasks.push(tokio::spawn(async move {
                fetcher.fetch_and_queue(pending.operation_id, pending.ledger).await;
            }));
        }

        for ledger in LedgerId::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            let watcher = Watcher::new(
                ledger,
                self.client.clone(),
                self.store.clone(),
                tx,
                self.config.clone(),
            );
            tasks.push(tokio::spawn(watcher.run(shutdown_rx.clone())));
            tasks.push(tokio::spawn(dispatch(fetcher.clone(), rx)));
        }

        info!(tasks = tasks.len(), "relayer started");
        Ok(RelayerHandle {
            shutdown: shutdown_tx,
            tasks,
            outcomes: Some(outcome_rx),
        })
    }
}

/// Control handle of a running relayer.
pub struct RelayerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    outcomes: Option<mpsc::Receiver<RelayOutcome>>,
}

impl RelayerHandle {
    /// The outcome stream. Can be taken once; lanes wait on it when it is
    /// full, so whoever takes it must keep draining it.
    pub fn take_outcomes(&mut self) -> Option<mpsc::Receiver<RelayOutcome>> {
        self.outcomes.take()
    }

    /// Stop the watchers and wait for in-flight proofs to drain.
    pub async fn shutdown(mut self) {
        // Nobody will read outcomes past this point.
        drop(self.outcomes.take());
        if self.shutdown.send(true).is_err() {
            debug!("relayer tasks already gone");
        }
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "relayer task ended abnormally");
            }
        }
        info!("relayer stopped");
    }
}
