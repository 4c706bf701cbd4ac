use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use trinity_storage::relayer_store::RelayerStore;
use trinity_storage::traits::KvStore;
use trinity_types::event::CoordinatorEvent;
use trinity_types::ledger::LedgerId;
use trinity_types::primitives::{short_hex, OperationId};

use crate::client::CoordinatorClient;
use crate::config::RelayerConfig;
use crate::error::RelayerError;

/// An operation created on the watched ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOperation {
    /// Event sequence number it was seen at.
    pub seq: u64,
    pub operation_id: OperationId,
    pub source_ledger: LedgerId,
}

/// Follows the coordinator event log for operations originating on one
/// ledger. The cursor is persisted after each event, so a restarted watcher
/// resumes where it stopped. Operations handed downstream stay recorded as
/// owed proofs until their lanes report, so delivery is at-least-once.
pub struct Watcher<C, S: KvStore> {
    ledger: LedgerId,
    client: Arc<C>,
    store: Arc<RelayerStore<S>>,
    queue: mpsc::Sender<NewOperation>,
    config: RelayerConfig,
}

impl<C: CoordinatorClient, S: KvStore> Watcher<C, S> {
    pub fn new(
        ledger: LedgerId,
        client: Arc<C>,
        store: Arc<RelayerStore<S>>,
        queue: mpsc::Sender<NewOperation>,
        config: RelayerConfig,
    ) -> Self {
        Self {
            ledger,
            client,
            store,
            queue,
            config,
        }
    }

    /// Poll until `shutdown` flips or the downstream queue closes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(ledger = %self.ledger, "watcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let caught_up = match self.poll_once().await {
                Ok(read) => read < self.config.event_batch,
                Err(RelayerError::ChannelClosed { .. }) => break,
                Err(e) => {
                    warn!(ledger = %self.ledger, error = %e, "event poll failed");
                    true
                }
            };
            if caught_up {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(self.config.poll_interval()) => {}
                }
            }
        }
        info!(ledger = %self.ledger, "watcher stopped");
    }

    /// Read one batch of events past the cursor and forward this ledger's new
    /// operations. Returns how many events were read.
    pub async fn poll_once(&self) -> Result<usize, RelayerError> {
        let from = match self.store.cursor(self.ledger)? {
            Some(seq) => seq + 1,
            None => 0,
        };
        let records = self
            .client
            .events_since(from, self.config.event_batch)
            .await?;

        for record in &records {
            match &record.event {
                CoordinatorEvent::OperationCreated {
                    operation_id,
                    source_ledger,
                    ..
                } if *source_ledger == self.ledger => {
                    debug!(
                        ledger = %self.ledger,
                        operation = %short_hex(operation_id),
                        seq = record.seq,
                        "new operation"
                    );
                    // Owed proofs are stored before the hand-off; a crash past
                    // this point is recovered by the relayer's replay.
                    self.store.record_operation(
                        self.ledger,
                        record.seq,
                        operation_id,
                        &source_ledger.others(),
                    )?;
                    self.queue
                        .send(NewOperation {
                            seq: record.seq,
                            operation_id: *operation_id,
                            source_ledger: *source_ledger,
                        })
                        .await
                        .map_err(|_| RelayerError::ChannelClosed {
                            reason: format!("{} dispatch queue", self.ledger),
                        })?;
                }
                _ => self.store.set_cursor(self.ledger, record.seq)?,
            }
        }
        Ok(records.len())
    }
}
