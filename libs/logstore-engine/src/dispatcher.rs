use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use logstore_api::broker::{Delivery, DeliveryStream};
use logstore_api::record::decode_records;
use logstore_api::LogBatch;

use crate::error::IngestError;
use crate::relay::RelaySender;

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    /// Shutdown was requested; in-flight tasks have finished.
    Cancelled,
    /// The broker ended the delivery stream.
    StreamClosed,
}

/// Live counters for the worker pool.
#[derive(Debug, Default)]
pub struct DispatchStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    received: AtomicU64,
    persisted: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchStats {
    /// Parse tasks running right now.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of parse tasks ever running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Deliveries pulled off the broker so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// Messages rejected for bad content or an unrecoverable store error.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(self)
    }
}

struct ActiveGuard<'a>(&'a DispatchStats);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Ack,
    Requeue,
    DeadLetter,
}

/// Bounded worker pool: one task per inbound message, at most `concurrency`
/// at a time. A full pool stops the dispatcher from pulling further
/// messages off the broker.
pub struct Dispatcher {
    limiter: Arc<Semaphore>,
    relay: RelaySender,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(concurrency: usize, relay: RelaySender) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(concurrency)),
            relay,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Consume `deliveries` until the stream ends or `token` is cancelled,
    /// then wait for every spawned task to settle its message.
    pub async fn run(
        &self,
        mut deliveries: Box<dyn DeliveryStream>,
        token: &CancellationToken,
    ) -> DispatchEnd {
        let tracker = TaskTracker::new();

        let end = loop {
            // Take a slot before pulling the next message.
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break DispatchEnd::Cancelled,
                permit = self.limiter.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break DispatchEnd::Cancelled,
                },
            };

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break DispatchEnd::Cancelled,
                next = deliveries.recv() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.stats.received.fetch_add(1, Ordering::SeqCst);
                    let relay = self.relay.clone();
                    let stats = self.stats.clone();
                    tracker.spawn(async move {
                        let _permit = permit;
                        process_delivery(delivery, &relay, &stats).await;
                    });
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "delivery error");
                }
                None => break DispatchEnd::StreamClosed,
            }
        };

        drop(deliveries);
        tracker.close();
        if !tracker.is_empty() {
            tracing::info!(in_flight = tracker.len(), "waiting for in-flight messages");
        }
        tracker.wait().await;
        end
    }
}

/// Decode a message body and validate every record in it.
pub fn decode_batch(body: &[u8]) -> Result<LogBatch, IngestError> {
    let raw = decode_records(body)?;
    Ok(LogBatch::from_raw(raw)?)
}

async fn process_delivery(delivery: Delivery, relay: &RelaySender, stats: &DispatchStats) {
    let _active = stats.enter();
    let tag = delivery.delivery_tag;

    let outcome = match decode_batch(&delivery.body) {
        Ok(batch) if batch.is_empty() => Ok(()),
        Ok(batch) => relay.submit(batch).await,
        Err(e) => Err(e),
    };

    let settle = match outcome {
        Ok(()) => {
            stats.persisted.fetch_add(1, Ordering::SeqCst);
            Settle::Ack
        }
        Err(e) if e.is_duplicate() => {
            // Redelivery of an already stored batch.
            stats.duplicates.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(delivery_tag = tag, "duplicate message, acknowledging");
            Settle::Ack
        }
        Err(IngestError::RelayClosed) => {
            tracing::warn!(delivery_tag = tag, "relay closed, returning message to queue");
            Settle::Requeue
        }
        Err(e) => {
            stats.dropped.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(delivery_tag = tag, error = %e, "dropping message");
            Settle::DeadLetter
        }
    };

    let settled = match settle {
        Settle::Ack => delivery.ack().await,
        Settle::Requeue => delivery.reject(true).await,
        Settle::DeadLetter => delivery.reject(false).await,
    };
    if let Err(e) = settled {
        tracing::error!(delivery_tag = tag, error = %e, "failed to settle message");
    }
}
