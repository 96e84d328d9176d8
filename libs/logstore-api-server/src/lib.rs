//! HTTP surface: save and query endpoints plus a broker health probe.

mod error;
mod http;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

use logstore_api::deserialize_duration;
use logstore_engine::{ConnectionState, LogService};

pub use error::{ApiError, ServerError};

fn default_timeout() -> Duration {
    Duration::from_secs(4)
}

/// `[http_server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpServerConfig {
    pub address: String,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub read_timeout: Duration,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub write_timeout: Duration,
}

impl HttpServerConfig {
    /// Whole-request deadline: reading the request plus producing the reply.
    pub fn request_timeout(&self) -> Duration {
        self.read_timeout + self.write_timeout
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: LogService,
    pub connection: watch::Receiver<ConnectionState>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/logs/save", post(http::handle_save))
        .route("/logs/get", get(http::handle_get))
        .route("/health", get(http::handle_health))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled. In-flight requests complete before
/// this returns, and the router (with its [`LogService`]) is dropped.
pub async fn run(
    config: &HttpServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = router(state).layer(TimeoutLayer::new(config.request_timeout()));

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .map_err(|source| ServerError::Bind {
            address: config.address.clone(),
            source,
        })?;
    tracing::info!(address = %config.address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ServerError::Serve)?;

    tracing::info!("http server stopped");
    Ok(())
}
