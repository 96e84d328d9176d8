use std::time::Duration;

use futures_util::TryStreamExt;
use mongodb::bson::{self, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, Credential, FindOptions, IndexOptions, ServerAddress};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use logstore_api::storage::LogStore;
use logstore_api::{
    BoxFuture, DomainLog, LogBatch, LogLevel, StoreError, deserialize_duration,
};

const DUPLICATE_KEY: i32 = 11000;

fn default_port() -> u16 {
    27017
}

fn default_collection() -> String {
    "logs".into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Connection settings for the MongoDB backend.
#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    #[serde(default)]
    pub mongo_user: String,
    #[serde(default)]
    pub mongo_password: String,
    pub mongo_hostname: String,
    #[serde(default = "default_port")]
    pub mongo_port: u16,
    pub mongo_db_name: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Server selection and connect timeout.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl MongoConfig {
    fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: self.mongo_hostname.clone(),
                port: Some(self.mongo_port),
            }])
            .app_name("logstore".to_string())
            .connect_timeout(self.timeout)
            .server_selection_timeout(self.timeout)
            .build();
        if !self.mongo_user.is_empty() {
            options.credential = Some(
                Credential::builder()
                    .username(self.mongo_user.clone())
                    .password(self.mongo_password.clone())
                    .build(),
            );
        }
        options
    }
}

/// Stored document shape. The timestamp is a BSON timestamp with a zero
/// increment.
#[derive(Debug, Serialize, Deserialize)]
struct LogDocument {
    timestamp: bson::Timestamp,
    level: String,
    pathname: String,
    message: String,
}

impl From<&DomainLog> for LogDocument {
    fn from(log: &DomainLog) -> Self {
        Self {
            timestamp: bson::Timestamp {
                time: log.timestamp,
                increment: 0,
            },
            level: log.level.as_str().to_string(),
            pathname: log.path.clone(),
            message: log.message.clone(),
        }
    }
}

impl TryFrom<LogDocument> for DomainLog {
    type Error = StoreError;

    fn try_from(doc: LogDocument) -> Result<Self, Self::Error> {
        let level = doc
            .level
            .parse::<LogLevel>()
            .map_err(|e| StoreError::backend(format!("stored document: {e}")))?;
        Ok(DomainLog {
            timestamp: doc.timestamp.time,
            level,
            path: doc.pathname,
            message: doc.message,
        })
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .is_some_and(|errs| errs.iter().any(|e| e.code == DUPLICATE_KEY)),
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn map_err(err: mongodb::error::Error) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::Duplicate
    } else {
        StoreError::backend(err.to_string())
    }
}

/// MongoDB-backed log store. One collection, unique compound index over
/// `(timestamp, level, pathname, message)`.
pub struct MongoStore {
    client: Client,
    collection: Collection<LogDocument>,
}

impl MongoStore {
    /// Build the client. No network traffic happens until [`LogStore::init`].
    pub fn connect(config: &MongoConfig) -> Result<Self, StoreError> {
        let client = Client::with_options(config.client_options()).map_err(map_err)?;
        let collection = client
            .database(&config.mongo_db_name)
            .collection::<LogDocument>(&config.collection);
        tracing::info!(
            host = %config.mongo_hostname,
            port = config.mongo_port,
            db = %config.mongo_db_name,
            collection = %config.collection,
            "mongo client created"
        );
        Ok(Self { client, collection })
    }
}

impl LogStore for MongoStore {
    fn init(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.client
                .database("admin")
                .run_command(doc! { "ping": 1 }, None)
                .await
                .map_err(map_err)?;

            let index = IndexModel::builder()
                .keys(doc! { "timestamp": 1, "level": 1, "pathname": 1, "message": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name("log_identity".to_string())
                        .build(),
                )
                .build();
            self.collection
                .create_index(index, None)
                .await
                .map_err(map_err)?;
            tracing::info!("mongo reachable, unique index ensured");
            Ok(())
        })
    }

    fn insert_batch<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let docs: Vec<LogDocument> = batch.records().iter().map(LogDocument::from).collect();
            self.collection
                .insert_many(docs, None)
                .await
                .map_err(map_err)?;
            Ok(())
        })
    }

    fn find_by_level(&self, level: LogLevel) -> BoxFuture<'_, Result<Vec<DomainLog>, StoreError>> {
        Box::pin(async move {
            let cursor = self
                .collection
                .find(doc! { "level": level.as_str() }, insertion_order())
                .await
                .map_err(map_err)?;
            let docs: Vec<LogDocument> = cursor.try_collect().await.map_err(map_err)?;
            docs.into_iter().map(DomainLog::try_from).collect()
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.client.clone().shutdown().await;
            tracing::info!("mongo client closed");
            Ok(())
        })
    }
}

/// ObjectIds generated by the driver increase with insertion time.
fn insertion_order() -> FindOptions {
    FindOptions::builder().sort(doc! { "_id": 1 }).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: MongoConfig = toml::from_str(
            r#"
            mongo_hostname = "db.internal"
            mongo_db_name = "logs"
            "#,
        )
        .unwrap();
        assert_eq!(config.mongo_port, 27017);
        assert_eq!(config.collection, "logs");
        assert_eq!(config.timeout, Duration::from_secs(10));

        let options = config.client_options();
        assert!(options.credential.is_none());
        assert_eq!(options.server_selection_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn level_queries_sort_by_insertion() {
        assert_eq!(insertion_order().sort, Some(doc! { "_id": 1 }));
    }

    #[test]
    fn credentials_are_attached_when_user_is_set() {
        let config: MongoConfig = toml::from_str(
            r#"
            mongo_user = "svc"
            mongo_password = "p@ss:word"
            mongo_hostname = "db.internal"
            mongo_port = 27018
            mongo_db_name = "logs"
            timeout = "3s"
            "#,
        )
        .unwrap();
        let options = config.client_options();
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("svc"));
        assert_eq!(credential.password.as_deref(), Some("p@ss:word"));
        assert_eq!(
            options.hosts,
            vec![ServerAddress::Tcp {
                host: "db.internal".into(),
                port: Some(27018)
            }]
        );
    }

    #[test]
    fn document_uses_bson_timestamp_and_pathname() {
        let log = DomainLog {
            timestamp: 1657861095,
            level: LogLevel::Warning,
            path: "/srv/app".into(),
            message: "disk".into(),
        };
        let doc = bson::to_document(&LogDocument::from(&log)).unwrap();
        assert_eq!(
            doc.get_timestamp("timestamp").unwrap(),
            bson::Timestamp {
                time: 1657861095,
                increment: 0
            }
        );
        assert_eq!(doc.get_str("level").unwrap(), "WARNING");
        assert_eq!(doc.get_str("pathname").unwrap(), "/srv/app");

        let back: LogDocument = bson::from_document(doc).unwrap();
        assert_eq!(DomainLog::try_from(back).unwrap(), log);
    }
}
