use crate::BoxFuture;
use crate::error::StoreError;
use crate::record::{DomainLog, LogBatch, LogLevel};

/// Document store holding log records.
///
/// The engine doesn't know concrete implementations; for the engine, storage
/// is just this trait. Implementations must treat
/// `(timestamp, level, path, message)` as a unique key and report a collision
/// as [`StoreError::Duplicate`].
pub trait LogStore: Send + Sync {
    /// Prepare the backend (indexes, connectivity check). Called once at startup.
    fn init(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    /// Insert every record of the batch in one call.
    fn insert_batch<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), StoreError>>;

    /// All records with the given level, in insertion order.
    fn find_by_level(&self, level: LogLevel) -> BoxFuture<'_, Result<Vec<DomainLog>, StoreError>>;

    /// Release backend resources. Called once during shutdown.
    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }
}
