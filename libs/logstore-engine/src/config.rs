use std::time::Duration;

use serde::Deserialize;

use logstore_api::broker::ConsumeSpec;
use logstore_api::deserialize_duration;

use crate::connection::ConnectionPolicies;
use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// One retry budget, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: Duration,
}

impl RetryConfig {
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.delay)
    }
}

/// `[ingest]` section: queue attachment, worker pool and retry budgets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,

    /// Let the broker acknowledge at delivery. Off by default: deliveries are
    /// acknowledged once their batch is persisted.
    #[serde(default)]
    pub auto_ack: bool,

    /// Maximum number of concurrently running parse tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Batches the relay holds before dispatcher workers block.
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,

    #[serde(default = "default_connect_retry")]
    pub connect_retry: RetryConfig,

    #[serde(default = "default_channel_retry")]
    pub channel_retry: RetryConfig,

    #[serde(default = "default_consume_retry")]
    pub consume_retry: RetryConfig,

    #[serde(default = "default_write_retry")]
    pub write_retry: RetryConfig,
}

fn default_queue() -> String {
    "logs_q".to_string()
}
fn default_consumer_tag() -> String {
    "logs-service".to_string()
}
fn default_concurrency() -> usize {
    10
}
fn default_relay_capacity() -> usize {
    64
}
fn default_connect_retry() -> RetryConfig {
    RetryConfig::new(5, Duration::from_secs(5))
}
fn default_channel_retry() -> RetryConfig {
    RetryConfig::new(5, Duration::from_secs(8))
}
fn default_consume_retry() -> RetryConfig {
    RetryConfig::new(10, Duration::from_secs(15))
}
fn default_write_retry() -> RetryConfig {
    RetryConfig::new(0, Duration::from_secs(1))
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            consumer_tag: default_consumer_tag(),
            auto_ack: false,
            concurrency: default_concurrency(),
            relay_capacity: default_relay_capacity(),
            connect_retry: default_connect_retry(),
            channel_retry: default_channel_retry(),
            consume_retry: default_consume_retry(),
            write_retry: default_write_retry(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.queue.is_empty() {
            return Err(EngineError::Config("ingest.queue must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(EngineError::Config("ingest.concurrency must be at least 1".into()));
        }
        if self.relay_capacity == 0 {
            return Err(EngineError::Config("ingest.relay_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn consume_spec(&self) -> ConsumeSpec {
        ConsumeSpec {
            queue: self.queue.clone(),
            consumer_tag: self.consumer_tag.clone(),
            auto_ack: self.auto_ack,
        }
    }

    pub fn connection_policies(&self) -> ConnectionPolicies {
        ConnectionPolicies {
            connect: self.connect_retry.policy(),
            channel: self.channel_retry.policy(),
            consume: self.consume_retry.policy(),
        }
    }
}
