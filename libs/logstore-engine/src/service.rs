use std::sync::Arc;

use logstore_api::storage::LogStore;
use logstore_api::{DomainLog, LogBatch, LogLevel, RawRecord};

use crate::error::IngestError;
use crate::relay::RelaySender;

/// Save and query facade used by the HTTP surface.
///
/// Saves go through the same relay as broker traffic, so the single writer
/// stays the only code path that inserts. Queries read the store directly.
#[derive(Clone)]
pub struct LogService {
    relay: RelaySender,
    store: Arc<dyn LogStore>,
}

impl LogService {
    pub fn new(relay: RelaySender, store: Arc<dyn LogStore>) -> Self {
        Self { relay, store }
    }

    /// Validate and persist a batch. Returns the number of records stored.
    pub async fn save_logs(&self, records: Vec<RawRecord>) -> Result<usize, IngestError> {
        let batch = LogBatch::from_raw(records).inspect_err(|e| {
            tracing::warn!(field = %e.field, "rejected invalid record");
        })?;
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        self.relay.submit(batch).await?;
        Ok(count)
    }

    pub async fn get_logs(&self, level: LogLevel) -> Result<Vec<DomainLog>, IngestError> {
        let logs = self.store.find_by_level(level).await.inspect_err(|e| {
            tracing::error!(level = %level, error = %e, "failed to read logs");
        })?;
        if logs.is_empty() {
            return Err(IngestError::NotFound);
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use logstore_api::{Field, StoreError};
    use storage_memory::MemoryStore;

    use super::*;
    use crate::relay::{self, Writer};
    use crate::retry::RetryPolicy;

    fn service() -> LogService {
        let store: Arc<dyn LogStore> = Arc::new(MemoryStore::default());
        let (tx, rx) = relay::channel(8);
        Writer::new(store.clone(), RetryPolicy::none()).spawn(rx);
        LogService::new(tx, store)
    }

    fn record(level: &str) -> RawRecord {
        RawRecord {
            unix_time: 1657861095,
            level: level.into(),
            pathname: "/a".into(),
            message: "ok".into(),
        }
    }

    #[tokio::test]
    async fn saved_records_are_queryable_by_level() {
        let svc = service();
        assert_eq!(svc.save_logs(vec![record("INFO"), record("error")]).await.unwrap(), 2);

        let info = svc.get_logs(LogLevel::Info).await.unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].path, "/a");
        let errors = svc.get_logs(LogLevel::Error).await.unwrap();
        assert_eq!(errors[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn second_identical_save_is_duplicate() {
        let svc = service();
        svc.save_logs(vec![record("INFO")]).await.unwrap();
        let err = svc.save_logs(vec![record("INFO")]).await.unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::Duplicate)));
    }

    #[tokio::test]
    async fn invalid_record_names_field_and_stores_nothing() {
        let svc = service();
        let bad = RawRecord {
            unix_time: 0,
            ..record("INFO")
        };
        match svc.save_logs(vec![record("INFO"), bad]).await.unwrap_err() {
            IngestError::Validation(e) => assert_eq!(e.field, Field::Timestamp),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            svc.get_logs(LogLevel::Info).await,
            Err(IngestError::NotFound)
        ));
    }

    #[tokio::test]
    async fn empty_level_is_not_found() {
        let svc = service();
        svc.save_logs(vec![record("INFO")]).await.unwrap();
        assert!(matches!(
            svc.get_logs(LogLevel::Critical).await,
            Err(IngestError::NotFound)
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let svc = service();
        assert_eq!(svc.save_logs(Vec::new()).await.unwrap(), 0);
    }
}
