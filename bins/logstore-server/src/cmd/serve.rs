use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use broker_amqp::AmqpBroker;
use logstore_api::storage::LogStore;
use logstore_api_server::AppState;
use logstore_engine::Engine;
use storage_memory::MemoryStore;
use storage_mongo::MongoStore;

use crate::config::{Cli, DatabaseConfig, ServerConfig};
use crate::error::ServerError;

pub async fn run(cli: Cli) -> Result<(), ServerError> {
    tracing::info!("logstore-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&cli.config)?;
    tracing::info!(config = %cli.config, backend = config.database.backend(), "loaded config");

    // --- Storage + broker ---
    let store: Arc<dyn LogStore> = match &config.database {
        DatabaseConfig::Mongo(mongo) => Arc::new(MongoStore::connect(mongo)?),
        DatabaseConfig::Memory(memory) => Arc::new(MemoryStore::from_config(memory)),
    };
    tracing::info!(
        host = %config.rabbitmq.rabbit_host,
        port = config.rabbitmq.rabbit_port,
        "using rabbitmq broker"
    );
    let broker = Arc::new(AmqpBroker::new(config.rabbitmq.clone()));

    // --- Ingestion ---
    let mut engine = Engine::start(&config.ingest, broker, store, CancellationToken::new()).await?;

    // --- HTTP server ---
    let http_token = CancellationToken::new();
    let state = AppState {
        service: engine.service(),
        connection: engine.connection_state(),
    };
    let http_config = config.http_server.clone();
    let server_token = http_token.clone();
    let mut http = tokio::spawn(async move {
        logstore_api_server::run(&http_config, state, server_token).await
    });

    tracing::info!("server ready");

    // --- Wait for a signal or a fatal failure ---
    let mut outcome: Result<(), ServerError> = Ok(());
    let mut http_done = false;
    tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("shutdown signal received");
        }
        ingest = engine.wait_ingest() => {
            if let Err(e) = ingest {
                tracing::error!(error = %e, "ingestion failed");
                outcome = Err(e.into());
            }
        }
        served = &mut http => {
            http_done = true;
            match served {
                Ok(Ok(())) => tracing::warn!("http server exited"),
                Ok(Err(e)) => outcome = Err(e.into()),
                Err(e) => outcome = Err(e.into()),
            }
        }
    }

    // --- Drain: http first, then ingestion and the writer ---
    tracing::info!("shutting down...");
    http_token.cancel();
    if !http_done {
        match http.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "http server error"),
            Err(e) => tracing::error!(error = %e, "http server task failed"),
        }
    }

    if let Err(e) = engine.shutdown().await {
        tracing::error!(error = %e, "engine shutdown error");
        if outcome.is_ok() {
            outcome = Err(e.into());
        }
    }

    tracing::info!("shutdown complete");
    outcome
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
