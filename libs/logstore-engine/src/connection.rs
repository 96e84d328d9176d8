use std::sync::Arc;

use tokio::sync::watch;

use logstore_api::broker::{Broker, BrokerChannel, BrokerConnection, ConsumeSpec, DeliveryStream};

use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// Broker link state. Only the [`ConnectionManager`] writes it; everyone else
/// observes it through [`ConnectionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: a retry budget was exhausted.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Independent retry budgets for the three establishment steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicies {
    pub connect: RetryPolicy,
    pub channel: RetryPolicy,
    pub consume: RetryPolicy,
}

/// Live connection + channel pair. Hand it back to
/// [`ConnectionManager::close`] once consumption has drained.
pub struct Session {
    connection: Box<dyn BrokerConnection>,
    channel: Box<dyn BrokerChannel>,
}

/// Establishes broker connection, channel and consumer, each under its own
/// bounded retry policy.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    policies: ConnectionPolicies,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn Broker>, policies: ConnectionPolicies) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            policies,
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::info!(from = prev.as_str(), to = next.as_str(), "broker connection state");
        }
    }

    pub async fn connect(&self) -> Result<Box<dyn BrokerConnection>, EngineError> {
        self.policies
            .connect
            .run("broker connect", || self.broker.connect())
            .await
            .map_err(|e| EngineError::Connect {
                attempts: e.attempts,
                source: e.last,
            })
    }

    pub async fn open_channel(
        &self,
        connection: &dyn BrokerConnection,
    ) -> Result<Box<dyn BrokerChannel>, EngineError> {
        self.policies
            .channel
            .run("open channel", || connection.open_channel())
            .await
            .map_err(|e| EngineError::Channel {
                attempts: e.attempts,
                source: e.last,
            })
    }

    pub async fn consume(
        &self,
        channel: &dyn BrokerChannel,
        spec: &ConsumeSpec,
    ) -> Result<Box<dyn DeliveryStream>, EngineError> {
        self.policies
            .consume
            .run("consume", || channel.consume(spec))
            .await
            .map_err(|e| EngineError::ConsumeSetup {
                queue: spec.queue.clone(),
                attempts: e.attempts,
                source: e.last,
            })
    }

    /// Connect, open a channel and attach the consumer.
    ///
    /// Any exhausted step leaves the state `Failed` and releases whatever was
    /// already opened.
    pub async fn establish(
        &self,
        spec: &ConsumeSpec,
    ) -> Result<(Session, Box<dyn DeliveryStream>), EngineError> {
        self.set_state(ConnectionState::Connecting);

        let connection = match self.connect().await {
            Ok(c) => c,
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                return Err(e);
            }
        };
        tracing::info!("connected to broker");

        let channel = match self.open_channel(connection.as_ref()).await {
            Ok(ch) => ch,
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                if let Err(close_err) = connection.close().await {
                    tracing::warn!(error = %close_err, "closing connection after channel failure");
                }
                return Err(e);
            }
        };
        tracing::info!("broker channel opened");

        let deliveries = match self.consume(channel.as_ref(), spec).await {
            Ok(d) => d,
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                let session = Session { connection, channel };
                release(&session).await;
                return Err(e);
            }
        };
        tracing::info!(queue = %spec.queue, consumer = %spec.consumer_tag, "consumer attached");

        self.set_state(ConnectionState::Connected);
        Ok((Session { connection, channel }, deliveries))
    }

    /// Publish `Disconnected` after an establish attempt was abandoned.
    pub fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Publish `Failed` when the caller gives up on the broker.
    pub fn mark_failed(&self) {
        self.set_state(ConnectionState::Failed);
    }

    /// Close channel then connection. Failures are reported, not fatal.
    pub async fn close(&self, session: Session) {
        release(&session).await;
        self.set_state(ConnectionState::Disconnected);
    }
}

async fn release(session: &Session) {
    if let Err(e) = session.channel.close().await {
        tracing::warn!(error = %e, "failed to close broker channel");
    }
    if let Err(e) = session.connection.close().await {
        tracing::warn!(error = %e, "failed to close broker connection");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::testing::FakeBroker;

    fn policies(max_retries: u32) -> ConnectionPolicies {
        let p = RetryPolicy::new(max_retries, Duration::from_secs(1));
        ConnectionPolicies {
            connect: p,
            channel: p,
            consume: p,
        }
    }

    fn spec() -> ConsumeSpec {
        ConsumeSpec {
            queue: "logs_q".into(),
            consumer_tag: "logs-service".into(),
            auto_ack: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_budget() {
        let (broker, _feed) = FakeBroker::new();
        broker.connect_failures.store(u32::MAX, Ordering::SeqCst);
        let manager = ConnectionManager::new(broker.clone(), policies(5));

        let err = manager.establish(&spec()).await.err().unwrap();

        assert!(matches!(err, EngineError::Connect { attempts: 6, .. }));
        assert!(err.is_fatal());
        assert_eq!(broker.connects.load(Ordering::SeqCst), 6);
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_absorbed() {
        let (broker, _feed) = FakeBroker::new();
        broker.connect_failures.store(2, Ordering::SeqCst);
        broker.consume_failures.store(3, Ordering::SeqCst);
        let manager = ConnectionManager::new(broker.clone(), policies(5));
        let mut state = manager.subscribe();

        let (session, _deliveries) = manager.establish(&spec()).await.unwrap();

        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
        assert_eq!(broker.connects.load(Ordering::SeqCst), 3);
        assert_eq!(broker.consumes.load(Ordering::SeqCst), 4);

        manager.close(session).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(broker.channels_closed.load(Ordering::SeqCst), 1);
        assert_eq!(broker.connections_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_establish_reads_disconnected() {
        let (broker, _feed) = FakeBroker::new();
        broker.connect_failures.store(u32::MAX, Ordering::SeqCst);
        let manager = ConnectionManager::new(broker.clone(), policies(5));

        let spec = spec();
        let attempt = tokio::time::timeout(Duration::from_millis(1500), manager.establish(&spec));
        assert!(attempt.await.is_err());
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.mark_disconnected();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_failure_releases_connection() {
        let (broker, _feed) = FakeBroker::new();
        broker.channel_failures.store(u32::MAX, Ordering::SeqCst);
        let manager = ConnectionManager::new(broker.clone(), policies(2));

        let err = manager.establish(&spec()).await.err().unwrap();

        assert!(matches!(err, EngineError::Channel { attempts: 3, .. }));
        assert_eq!(broker.connections_closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_failure_names_the_queue() {
        let (broker, _feed) = FakeBroker::new();
        broker.consume_failures.store(u32::MAX, Ordering::SeqCst);
        let manager = ConnectionManager::new(broker.clone(), policies(1));

        match manager.establish(&spec()).await.err().unwrap() {
            EngineError::ConsumeSetup { queue, attempts, .. } => {
                assert_eq!(queue, "logs_q");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(broker.channels_closed.load(Ordering::SeqCst), 1);
        assert_eq!(broker.connections_closed.load(Ordering::SeqCst), 1);
    }
}
