use std::fmt;

/// Outcome of a failed store operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A record with a colliding unique key already exists.
    #[error("duplicate record")]
    Duplicate,

    #[error("storage: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate)
    }
}

/// Which broker step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    Connection,
    Channel,
    Consume,
    Ack,
    Close,
}

/// Error returned by every broker trait method.
#[derive(Debug, Clone)]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Connection, message: msg.into() }
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Channel, message: msg.into() }
    }

    pub fn consume(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Consume, message: msg.into() }
    }

    pub fn ack(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Ack, message: msg.into() }
    }

    pub fn close(msg: impl Into<String>) -> Self {
        Self { kind: BrokerErrorKind::Close, message: msg.into() }
    }

    /// Add context to the error, preserving the original kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}
