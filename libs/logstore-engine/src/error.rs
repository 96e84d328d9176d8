use logstore_api::{BrokerError, StoreError, ValidationError};

/// Process-level failures. The connection-tier variants are fatal: ingestion
/// has no value without a live broker.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("broker connection failed after {attempts} attempts: {source}")]
    Connect { attempts: u32, source: BrokerError },

    #[error("broker channel failed after {attempts} attempts: {source}")]
    Channel { attempts: u32, source: BrokerError },

    #[error("consumer setup on '{queue}' failed after {attempts} attempts: {source}")]
    ConsumeSetup {
        queue: String,
        attempts: u32,
        source: BrokerError,
    },

    #[error("delivery stream on '{queue}' closed {closures} times in a row")]
    StreamLost { queue: String, closures: u32 },

    #[error("writer stopped unexpectedly: {0}")]
    WriterStopped(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Connection-tier failure after exhausting its retry budget, or loss
    /// of the writer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Connect { .. }
                | EngineError::Channel { .. }
                | EngineError::ConsumeSetup { .. }
                | EngineError::StreamLost { .. }
                | EngineError::WriterStopped(_)
        )
    }
}

/// Per-message and per-request failures. Contained by the dispatcher and
/// mapped to status codes by the HTTP surface; never fatal.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid data format: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no logs found")]
    NotFound,

    #[error("ingestion relay closed")]
    RelayClosed,
}

impl IngestError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestError::Store(StoreError::Duplicate))
    }
}
