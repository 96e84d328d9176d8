use crate::BoxFuture;
use crate::error::BrokerError;

/// Queue attachment parameters for [`BrokerChannel::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeSpec {
    pub queue: String,
    pub consumer_tag: String,
    /// Broker acknowledges at delivery; settlement calls become no-ops.
    pub auto_ack: bool,
}

/// Entry point into a message broker. Only opens connections; everything
/// else hangs off the returned handles.
pub trait Broker: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerConnection>, BrokerError>>;
}

pub trait BrokerConnection: Send + Sync {
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn BrokerChannel>, BrokerError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

pub trait BrokerChannel: Send + Sync {
    /// Attach a consumer to a pre-existing queue.
    fn consume<'a>(
        &'a self,
        spec: &'a ConsumeSpec,
    ) -> BoxFuture<'a, Result<Box<dyn DeliveryStream>, BrokerError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Continuous stream of inbound messages. `None` means the broker side ended
/// the stream (consumer cancelled, channel or connection lost).
pub trait DeliveryStream: Send {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Delivery, BrokerError>>>;
}

/// Settles one delivery with the broker.
pub trait Acknowledger: Send + Sync {
    fn ack(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    fn reject(&self, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// One raw inbound message.
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    acker: Option<Box<dyn Acknowledger>>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

impl Delivery {
    /// Delivery that must be settled explicitly.
    pub fn new(delivery_tag: u64, body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { delivery_tag, body, acker: Some(acker) }
    }

    /// Delivery already acknowledged by the broker.
    pub fn auto_acked(delivery_tag: u64, body: Vec<u8>) -> Self {
        Self { delivery_tag, body, acker: None }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.reject(requeue).await,
            None => Ok(()),
        }
    }
}
