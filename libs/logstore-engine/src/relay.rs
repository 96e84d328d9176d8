use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use logstore_api::storage::LogStore;
use logstore_api::{LogBatch, StoreError};

use crate::error::IngestError;
use crate::retry::{RetryError, RetryPolicy};

struct Submission {
    batch: LogBatch,
    reply: oneshot::Sender<Result<(), StoreError>>,
}

/// Creates the bounded relay between producers (dispatcher workers, the
/// HTTP save path) and the single [`Writer`].
pub fn channel(capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RelaySender { tx }, RelayReceiver { rx })
}

/// Producer side of the relay. Cheap to clone.
#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<Submission>,
}

/// Pending persistence outcome of an enqueued batch.
pub struct PendingWrite {
    rx: oneshot::Receiver<Result<(), StoreError>>,
}

impl PendingWrite {
    pub async fn outcome(self) -> Result<(), IngestError> {
        self.rx.await.map_err(|_| IngestError::RelayClosed)??;
        Ok(())
    }
}

impl RelaySender {
    /// Queue a batch behind everything already queued. Waits while the relay
    /// is full.
    pub async fn enqueue(&self, batch: LogBatch) -> Result<PendingWrite, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission { batch, reply })
            .await
            .map_err(|_| IngestError::RelayClosed)?;
        Ok(PendingWrite { rx })
    }

    /// Queue a batch and wait until the writer has persisted or dropped it.
    pub async fn submit(&self, batch: LogBatch) -> Result<(), IngestError> {
        self.enqueue(batch).await?.outcome().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct RelayReceiver {
    rx: mpsc::Receiver<Submission>,
}

/// Totals reported when the writer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    pub batches: u64,
    pub records: u64,
    pub duplicates: u64,
    pub failed: u64,
}

/// The only task that writes to the store. Drains the relay one batch at a
/// time, so no two inserts ever run concurrently and store mutations follow
/// relay order.
pub struct Writer {
    store: Arc<dyn LogStore>,
    retry: RetryPolicy,
}

impl Writer {
    pub fn new(store: Arc<dyn LogStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn spawn(self, relay: RelayReceiver) -> JoinHandle<WriterSummary> {
        tokio::spawn(self.run(relay))
    }

    /// Runs until every [`RelaySender`] is dropped and the relay is empty.
    pub async fn run(self, mut relay: RelayReceiver) -> WriterSummary {
        let mut summary = WriterSummary::default();
        tracing::info!("writer started");

        while let Some(Submission { batch, reply }) = relay.rx.recv().await {
            let result = self.persist(&batch).await;
            match &result {
                Ok(()) => {
                    summary.batches += 1;
                    summary.records += batch.len() as u64;
                }
                Err(StoreError::Duplicate) => summary.duplicates += 1,
                Err(_) => summary.failed += 1,
            }
            // The submitter may have given up waiting; the outcome is logged either way.
            let _ = reply.send(result);
        }

        tracing::info!(
            batches = summary.batches,
            records = summary.records,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "writer drained"
        );
        summary
    }

    async fn persist(&self, batch: &LogBatch) -> Result<(), StoreError> {
        let result = self
            .retry
            .run("bulk insert", || self.store.insert_batch(batch))
            .await;
        match result {
            Ok(()) => {
                tracing::debug!(records = batch.len(), "batch persisted");
                Ok(())
            }
            Err(RetryError {
                last: StoreError::Duplicate,
                ..
            }) => {
                tracing::warn!(records = batch.len(), "duplicate batch dropped");
                Err(StoreError::Duplicate)
            }
            Err(RetryError { attempts, last }) => {
                tracing::error!(records = batch.len(), attempts, error = %last, "batch dropped");
                Err(last)
            }
        }
    }
}
