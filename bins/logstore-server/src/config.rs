use clap::{Parser, ValueEnum};
use serde::Deserialize;

use broker_amqp::AmqpConfig;
use logstore_api_server::HttpServerConfig;
use logstore_engine::IngestConfig;
use storage_memory::MemoryConfig;
use storage_mongo::MongoConfig;

use crate::error::ServerError;

#[derive(Parser, Debug)]
#[command(name = "logstore-server", about = "Log ingestion and query service")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub http_server: HttpServerConfig,
    pub database: DatabaseConfig,
    pub rabbitmq: AmqpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// `[database]` section, selected by `backend`.
#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Mongo(MongoConfig),
    Memory(MemoryConfig),
}

impl DatabaseConfig {
    pub fn backend(&self) -> &'static str {
        match self {
            DatabaseConfig::Mongo(_) => "mongo",
            DatabaseConfig::Memory(_) => "memory",
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        let config: Self = toml::from_str(content).map_err(|e| ServerError::Config {
            context: "parse",
            detail: e.to_string(),
        })?;
        config
            .ingest
            .validate()
            .map_err(|e| ServerError::Config {
                context: "ingest",
                detail: e.to_string(),
            })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const FULL: &str = r#"
        [http_server]
        address = "0.0.0.0:8080"
        read_timeout = "4s"
        write_timeout = "4s"

        [database]
        backend = "mongo"
        mongo_user = "logs"
        mongo_password = "secret"
        mongo_hostname = "mongo"
        mongo_port = 27017
        mongo_db_name = "logsdb"
        timeout = "10s"

        [rabbitmq]
        rabbit_user = "guest"
        rabbit_password = "guest"
        rabbit_host = "rabbit"

        [ingest]
        concurrency = 4
        connect_retry = { max_retries = 3, delay = "2s" }
    "#;

    #[test]
    fn parses_full_config() {
        let config = ServerConfig::parse(FULL).unwrap();
        assert_eq!(config.http_server.address, "0.0.0.0:8080");
        match &config.database {
            DatabaseConfig::Mongo(m) => {
                assert_eq!(m.mongo_db_name, "logsdb");
                assert_eq!(m.collection, "logs");
                assert_eq!(m.timeout, Duration::from_secs(10));
            }
            other => panic!("unexpected backend {}", other.backend()),
        }
        assert_eq!(config.rabbitmq.rabbit_port, 5672);
        assert_eq!(config.ingest.concurrency, 4);
        assert_eq!(config.ingest.connect_retry.max_retries, 3);
        assert_eq!(config.ingest.queue, "logs_q");
    }

    #[test]
    fn ingest_section_is_optional() {
        let config = ServerConfig::parse(
            r#"
            [http_server]
            address = "127.0.0.1:0"

            [database]
            backend = "memory"

            [rabbitmq]
            rabbit_host = "localhost"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.backend(), "memory");
        assert_eq!(config.ingest, IngestConfig::default());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let content = FULL.replace("concurrency = 4", "concurrency = 0");
        let err = ServerConfig::parse(&content).unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "ingest", .. }));
    }

    #[test]
    fn rejects_unknown_backend_and_bad_duration() {
        let unknown = FULL.replace(r#"backend = "mongo""#, r#"backend = "redis""#);
        assert!(ServerConfig::parse(&unknown).is_err());

        let bad = FULL.replace(r#"delay = "2s""#, r#"delay = "soon""#);
        assert!(ServerConfig::parse(&bad).is_err());
    }
}
