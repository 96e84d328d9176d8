use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logstore_api::broker::{Broker, ConsumeSpec};
use logstore_api::storage::LogStore;

use crate::config::IngestConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::{DispatchEnd, DispatchStats, Dispatcher};
use crate::error::EngineError;
use crate::relay::{self, Writer, WriterSummary};
use crate::retry::RetryPolicy;
use crate::service::LogService;

/// The running ingestion pipeline: broker consumer, worker pool, relay and
/// writer.
pub struct Engine {
    service: LogService,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<DispatchStats>,
    ingest: Option<JoinHandle<Result<(), EngineError>>>,
    writer: Option<JoinHandle<WriterSummary>>,
    store: Arc<dyn LogStore>,
    token: CancellationToken,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &*self.state.borrow())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Engine {
    /// Initialise the store, start the writer and spawn the ingestion loop.
    ///
    /// Broker connection happens in the background; watch
    /// [`Engine::connection_state`] or await [`Engine::wait_ingest`] for its
    /// outcome.
    pub async fn start(
        config: &IngestConfig,
        broker: Arc<dyn Broker>,
        store: Arc<dyn LogStore>,
        token: CancellationToken,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        store.init().await?;
        tracing::info!("store ready");

        let (relay_tx, relay_rx) = relay::channel(config.relay_capacity);
        let writer = Writer::new(store.clone(), config.write_retry.policy()).spawn(relay_rx);

        let manager = ConnectionManager::new(broker, config.connection_policies());
        let state = manager.subscribe();
        let dispatcher = Dispatcher::new(config.concurrency, relay_tx.clone());
        let stats = dispatcher.stats();

        let ingest = tokio::spawn(run_ingest(
            manager,
            dispatcher,
            config.consume_spec(),
            config.connect_retry.policy(),
            token.clone(),
        ));
        tracing::info!(
            queue = %config.queue,
            concurrency = config.concurrency,
            relay_capacity = config.relay_capacity,
            auto_ack = config.auto_ack,
            "ingestion started"
        );

        Ok(Engine {
            service: LogService::new(relay_tx, store.clone()),
            state,
            stats,
            ingest: Some(ingest),
            writer: Some(writer),
            store,
            token,
        })
    }

    /// Save/query facade sharing this engine's writer.
    pub fn service(&self) -> LogService {
        self.service.clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Resolves when the ingestion loop or the writer stops on its own. An
    /// `Err` is fatal: a connection-tier failure, or a writer that exited
    /// before shutdown. Losing the writer also cancels ingestion so no more
    /// messages are pulled. Pending forever once observed.
    pub async fn wait_ingest(&mut self) -> Result<(), EngineError> {
        let (Some(ingest), Some(writer)) = (self.ingest.as_mut(), self.writer.as_mut()) else {
            return std::future::pending().await;
        };
        let exit = tokio::select! {
            result = ingest => TaskExit::Ingest(result),
            result = writer => TaskExit::Writer(result),
        };

        match exit {
            TaskExit::Ingest(result) => {
                self.ingest = None;
                result?
            }
            TaskExit::Writer(result) => {
                self.writer = None;
                self.token.cancel();
                let reason = match result {
                    Ok(_) => "relay closed".to_string(),
                    Err(e) => e.to_string(),
                };
                tracing::error!(reason = %reason, "writer stopped, cancelling ingestion");
                Err(EngineError::WriterStopped(reason))
            }
        }
    }

    /// Drain-then-stop: stop pulling messages, let in-flight batches persist,
    /// release the broker, then stop the writer.
    ///
    /// Every [`LogService`] handed out must be dropped first (stop the HTTP
    /// server before calling this); the writer only exits once the relay has
    /// no senders left.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.token.cancel();

        let mut result = Ok(());
        if let Some(handle) = self.ingest {
            result = handle.await.map_err(EngineError::from).and_then(|r| r);
        }
        tracing::info!("ingestion stopped");

        drop(self.service);
        if let Some(writer) = self.writer {
            let summary = writer.await?;
            tracing::info!(
                batches = summary.batches,
                duplicates = summary.duplicates,
                failed = summary.failed,
                "writer stopped"
            );
        }

        if let Err(e) = self.store.close().await {
            tracing::error!(error = %e, "failed to close store");
        }
        result
    }
}

enum TaskExit {
    Ingest(Result<Result<(), EngineError>, tokio::task::JoinError>),
    Writer(Result<WriterSummary, tokio::task::JoinError>),
}

/// Establish, consume, and re-establish after the broker ends the stream.
///
/// Streams that close without delivering anything count against `reconnect`;
/// once its budget is spent the loop gives up with
/// [`EngineError::StreamLost`]. Each reconnect waits `reconnect.delay`.
async fn run_ingest(
    manager: ConnectionManager,
    dispatcher: Dispatcher,
    spec: ConsumeSpec,
    reconnect: RetryPolicy,
    token: CancellationToken,
) -> Result<(), EngineError> {
    let stats = dispatcher.stats();
    let mut closures = 0u32;

    loop {
        let (session, deliveries) = tokio::select! {
            biased;
            _ = token.cancelled() => {
                manager.mark_disconnected();
                return Ok(());
            }
            established = manager.establish(&spec) => established?,
        };
        tracing::info!(queue = %spec.queue, "consuming, waiting for messages");

        let received_before = stats.received();
        let end = dispatcher.run(deliveries, &token).await;
        manager.close(session).await;

        if end == DispatchEnd::Cancelled {
            return Ok(());
        }

        if stats.received() > received_before {
            closures = 0;
        }
        closures += 1;
        if closures > reconnect.max_retries {
            tracing::error!(queue = %spec.queue, closures, "delivery stream keeps closing, giving up");
            manager.mark_failed();
            return Err(EngineError::StreamLost {
                queue: spec.queue.clone(),
                closures,
            });
        }
        tracing::warn!(
            queue = %spec.queue,
            closures,
            delay = ?reconnect.delay,
            "delivery stream closed by broker, reconnecting"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(reconnect.delay) => {}
        }
    }
}
