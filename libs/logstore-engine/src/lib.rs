pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod relay;
pub mod retry;
pub mod service;

#[cfg(test)]
mod testing;

pub use bootstrap::Engine;
pub use config::{IngestConfig, RetryConfig};
pub use connection::{ConnectionManager, ConnectionPolicies, ConnectionState, Session};
pub use dispatcher::{DispatchEnd, DispatchStats, Dispatcher};
pub use error::{EngineError, IngestError};
pub use relay::{RelayReceiver, RelaySender, Writer, WriterSummary};
pub use retry::{RetryError, RetryPolicy, Retryable};
pub use service::LogService;
