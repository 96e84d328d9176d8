#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("store: {0}")]
    Store(#[from] logstore_api::StoreError),

    #[error("{0}")]
    Engine(#[from] logstore_engine::EngineError),

    #[error("http: {0}")]
    Http(#[from] logstore_api_server::ServerError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
