use std::collections::HashSet;

use tokio::sync::RwLock;

use logstore_api::storage::LogStore;
use logstore_api::{BoxFuture, DomainLog, LogBatch, LogLevel, StoreError};

fn default_max_records() -> usize {
    1_000_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

#[derive(Default)]
struct Inner {
    records: Vec<DomainLog>,
    keys: HashSet<DomainLog>,
}

/// In-process log store with the same uniqueness rule as the document store.
///
/// A batch is applied all-or-nothing: a collision with a stored record or
/// inside the batch itself rejects the whole batch. Full stores refuse
/// inserts instead of evicting.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    max_records: usize,
}

impl MemoryStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_records,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_records)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_max_records())
    }
}

impl LogStore for MemoryStore {
    fn insert_batch<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if inner.records.len() + batch.len() > self.max_records {
                return Err(StoreError::backend(format!(
                    "memory store full ({} records)",
                    self.max_records
                )));
            }

            let mut incoming = HashSet::with_capacity(batch.len());
            for record in batch.records() {
                if inner.keys.contains(record) || !incoming.insert(record) {
                    return Err(StoreError::Duplicate);
                }
            }

            for record in batch.records() {
                inner.keys.insert(record.clone());
                inner.records.push(record.clone());
            }
            Ok(())
        })
    }

    fn find_by_level(&self, level: LogLevel) -> BoxFuture<'_, Result<Vec<DomainLog>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .records
                .iter()
                .filter(|r| r.level == level)
                .cloned()
                .collect())
        })
    }
}
