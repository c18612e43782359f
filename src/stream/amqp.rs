//! Exchange-based broker sink (AMQP 0-9-1).
//!
//! Each send runs on its own channel:
//!
//! 1. open a channel from the shared connection
//! 2. declare the destination exchange (idempotent)
//! 3. publish the payload with the resolved routing key
//! 4. release the channel, whatever happened in 2 and 3
//!
//! Declaring before publishing is what makes a misconfigured destination
//! observable: AMQP silently drops publishes to a missing exchange.

#[cfg(feature = "rabbitmq")]
mod lapin_channel;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    DynamicValues, OutboxMessage,
    options::ResolveOptions,
    stream::{EventStream, Phase, SinkError, ensure_active, until_cancelled},
};

/// Destination exchange name. Defaults to `""`, the broker's default exchange.
pub const EXCHANGE_NAME: &str = "exchange.name";
/// Exchange type. Defaults to `"topic"`.
pub const EXCHANGE_TYPE: &str = "exchange.type";
/// Routing key. Defaults to `""`.
pub const ROUTING_KEY: &str = "routing_key";
/// Whether the exchange survives broker restarts. Defaults to `true`.
pub const EXCHANGE_DURABLE: &str = "exchange.durable";
/// Whether the exchange is deleted once unbound. Defaults to `false`.
pub const EXCHANGE_AUTO_DELETE: &str = "exchange.auto_delete";
/// Whether the exchange only accepts exchange-to-exchange bindings. Defaults to `false`.
pub const EXCHANGE_INTERNAL: &str = "exchange.internal";
/// Whether to declare without waiting for the broker's reply. Defaults to `false`.
pub const EXCHANGE_NO_WAIT: &str = "exchange.no_wait";

/// Content type of every published message.
pub const CONTENT_TYPE: &str = "text/plain";

/// Exchange options resolved from a message's option bag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExchangeOptions {
    #[serde(rename = "exchange.name", default)]
    pub exchange: String,
    #[serde(rename = "exchange.type", default = "default_exchange_type")]
    pub kind: String,
    #[serde(rename = "routing_key", default)]
    pub routing_key: String,
    #[serde(rename = "exchange.durable", default = "default_durable")]
    pub durable: bool,
    #[serde(rename = "exchange.auto_delete", default)]
    pub auto_delete: bool,
    #[serde(rename = "exchange.internal", default)]
    pub internal: bool,
    #[serde(rename = "exchange.no_wait", default)]
    pub no_wait: bool,
}

fn default_exchange_type() -> String {
    "topic".to_owned()
}

fn default_durable() -> bool {
    true
}

impl ResolveOptions for ExchangeOptions {}

/// AMQP delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    Transient = 1,
    Persistent = 2,
}

/// A single `basic.publish`.
#[derive(Debug, Clone, Copy)]
pub struct Publishing<'a> {
    pub exchange: &'a str,
    pub routing_key: &'a str,
    pub mandatory: bool,
    pub immediate: bool,
    pub content_type: &'a str,
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub headers: &'a DynamicValues,
    pub body: &'a [u8],
}

/// Source of per-send channels, typically a shared AMQP connection.
///
/// The provider is owned by the caller; the sink only asks it for channels.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    type Channel: AmqpChannel;

    /// Open a fresh channel for one send.
    async fn open_channel(&self) -> Result<Self::Channel, tower::BoxError>;
}

#[async_trait]
impl<T> ChannelProvider for Arc<T>
where
    T: ChannelProvider + ?Sized,
{
    type Channel = T::Channel;

    async fn open_channel(&self) -> Result<Self::Channel, tower::BoxError> {
        (**self).open_channel().await
    }
}

/// The channel operations a send needs.
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn declare_exchange(&self, options: &ExchangeOptions) -> Result<(), tower::BoxError>;

    async fn publish(&self, publishing: Publishing<'_>) -> Result<(), tower::BoxError>;

    /// Close the channel. Called exactly once per opened channel whose send
    /// runs to completion.
    ///
    /// A send future dropped mid-flight (under an outer timeout, say) never
    /// calls it, so channels must also close themselves when dropped. `lapin`
    /// channels do: the last handle going away closes the channel.
    async fn release(&self) -> Result<(), tower::BoxError>;
}

/// AMQP sink.
///
/// Messages are published as transient (`delivery_mode = 1`) with content
/// type `text/plain`; message headers are sent as AMQP headers. The outbox
/// redelivers until a send succeeds, so the broker does not persist them.
pub struct Amqp<P> {
    provider: P,
}

impl<P> Amqp<P> {
    /// Create a new sink over a channel provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> EventStream for Amqp<P>
where
    P: ChannelProvider,
{
    #[tracing::instrument(
        skip_all,
        fields(
            id = ?message.id,
            exchange = tracing::field::Empty,
            routing_key = tracing::field::Empty
        )
    )]
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        let options = ExchangeOptions::resolve(&message.options)?;
        let span = tracing::Span::current();
        span.record("exchange", options.exchange.as_str());
        span.record("routing_key", options.routing_key.as_str());

        let channel =
            until_cancelled(cancel, Phase::Declare, self.provider.open_channel()).await?;

        let result = declare_and_publish(&channel, &options, cancel, message).await;

        if let Err(error) = channel.release().await {
            tracing::warn!(%error, "Failed to release AMQP channel");
        }

        if result.is_ok() {
            tracing::debug!("Message published to exchange");
        }
        result
    }
}

async fn declare_and_publish<C: AmqpChannel>(
    channel: &C,
    options: &ExchangeOptions,
    cancel: &CancellationToken,
    message: &OutboxMessage,
) -> Result<(), SinkError> {
    until_cancelled(cancel, Phase::Declare, channel.declare_exchange(options)).await?;

    ensure_active(cancel, Phase::Publish)?;
    channel
        .publish(Publishing {
            exchange: &options.exchange,
            routing_key: &options.routing_key,
            mandatory: false,
            immediate: false,
            content_type: CONTENT_TYPE,
            delivery_mode: DeliveryMode::Transient,
            priority: 0,
            headers: &message.headers,
            body: &message.payload,
        })
        .await
        .map_err(SinkError::publish)
}
