//! RabbitMQ broker over AMQP 0-9-1.

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::uri::{AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use serde::Deserialize;

use logstore_api::BoxFuture;
use logstore_api::broker::{
    Acknowledger, Broker, BrokerChannel, BrokerConnection, ConsumeSpec, Delivery, DeliveryStream,
};
use logstore_api::BrokerError;

const REPLY_SUCCESS: u16 = 200;

fn default_user() -> String {
    "guest".into()
}

fn default_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmqpConfig {
    #[serde(default = "default_user")]
    pub rabbit_user: String,
    #[serde(default = "default_user")]
    pub rabbit_password: String,
    pub rabbit_host: String,
    #[serde(default = "default_port")]
    pub rabbit_port: u16,
    #[serde(default = "default_vhost")]
    pub vhost: String,
}

impl AmqpConfig {
    fn uri(&self) -> AMQPUri {
        let mut uri = AMQPUri::default();
        uri.authority.userinfo = AMQPUserInfo {
            username: self.rabbit_user.clone(),
            password: self.rabbit_password.clone(),
        };
        uri.authority.host = self.rabbit_host.clone();
        uri.authority.port = self.rabbit_port;
        uri.vhost = self.vhost.clone();
        uri
    }
}

pub struct AmqpBroker {
    config: AmqpConfig,
}

impl AmqpBroker {
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }
}

impl Broker for AmqpBroker {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn BrokerConnection>, BrokerError>> {
        Box::pin(async move {
            let connection = Connection::connect_uri(self.config.uri(), ConnectionProperties::default())
                .await
                .map_err(|e| {
                    BrokerError::connection(e.to_string()).with_context(format!(
                        "{}:{}",
                        self.config.rabbit_host, self.config.rabbit_port
                    ))
                })?;
            Ok(Box::new(AmqpConnection { connection }) as Box<dyn BrokerConnection>)
        })
    }
}

struct AmqpConnection {
    connection: Connection,
}

impl BrokerConnection for AmqpConnection {
    fn open_channel(&self) -> BoxFuture<'_, Result<Box<dyn BrokerChannel>, BrokerError>> {
        Box::pin(async move {
            let channel = self
                .connection
                .create_channel()
                .await
                .map_err(|e| BrokerError::channel(e.to_string()))?;
            Ok(Box::new(AmqpChannel { channel }) as Box<dyn BrokerChannel>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if !self.connection.status().connected() {
                tracing::debug!("amqp connection already closed");
                return Ok(());
            }
            self.connection
                .close(REPLY_SUCCESS, "shutdown")
                .await
                .map_err(|e| BrokerError::close(e.to_string()).with_context("connection"))
        })
    }
}

struct AmqpChannel {
    channel: Channel,
}

impl BrokerChannel for AmqpChannel {
    fn consume<'a>(
        &'a self,
        spec: &'a ConsumeSpec,
    ) -> BoxFuture<'a, Result<Box<dyn DeliveryStream>, BrokerError>> {
        Box::pin(async move {
            let options = BasicConsumeOptions {
                no_ack: spec.auto_ack,
                ..BasicConsumeOptions::default()
            };
            let consumer = self
                .channel
                .basic_consume(&spec.queue, &spec.consumer_tag, options, FieldTable::default())
                .await
                .map_err(|e| BrokerError::consume(e.to_string()).with_context(&spec.queue))?;
            tracing::debug!(
                channel = self.channel.id(),
                queue = %spec.queue,
                consumer = %spec.consumer_tag,
                no_ack = spec.auto_ack,
                "amqp consumer registered"
            );
            Ok(Box::new(AmqpDeliveries {
                consumer,
                auto_ack: spec.auto_ack,
            }) as Box<dyn DeliveryStream>)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if !self.channel.status().connected() {
                tracing::debug!(channel = self.channel.id(), "amqp channel already closed");
                return Ok(());
            }
            self.channel
                .close(REPLY_SUCCESS, "shutdown")
                .await
                .map_err(|e| BrokerError::close(e.to_string()).with_context("channel"))
        })
    }
}

struct AmqpDeliveries {
    consumer: Consumer,
    auto_ack: bool,
}

impl DeliveryStream for AmqpDeliveries {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Delivery, BrokerError>>> {
        Box::pin(async move {
            let Some(next) = self.consumer.next().await else {
                tracing::debug!(
                    consumer = self.consumer.tag().as_str(),
                    "amqp consumer stream ended"
                );
                return None;
            };
            Some(
                next.map(|d| {
                    if self.auto_ack {
                        Delivery::auto_acked(d.delivery_tag, d.data)
                    } else {
                        Delivery::new(d.delivery_tag, d.data, Box::new(AmqpAcker(d.acker)))
                    }
                })
                .map_err(|e| {
                    tracing::warn!(
                        consumer = self.consumer.tag().as_str(),
                        error = %e,
                        "amqp consumer error"
                    );
                    BrokerError::consume(e.to_string())
                }),
            )
        })
    }
}

struct AmqpAcker(lapin::acker::Acker);

impl Acknowledger for AmqpAcker {
    fn ack(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.0
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "amqp ack failed");
                    BrokerError::ack(e.to_string())
                })
        })
    }

    fn reject(&self, requeue: bool) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.0
                .reject(BasicRejectOptions { requeue })
                .await
                .map_err(|e| {
                    tracing::warn!(requeue, error = %e, "amqp reject failed");
                    BrokerError::ack(e.to_string()).with_context("reject")
                })
        })
    }
}
