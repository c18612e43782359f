//! Managed pub/sub sink.
//!
//! Publishing is asynchronous in pub/sub client libraries: a publish returns
//! a handle that later resolves to the server-assigned message id. The sink
//! always waits for that id, so a successful send means the service accepted
//! the message.

#[cfg(feature = "pubsub")]
mod gcp;

#[cfg(feature = "pubsub")]
pub use gcp::GcpPubSub;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures_core::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    DynamicValues, OutboxMessage,
    message::header_text,
    options::ResolveOptions,
    stream::{EventStream, Phase, SinkError, ensure_active, until_cancelled},
};

/// Destination topic name. Required.
pub const TOPIC_NAME: &str = "topic_name";
/// Ordering key. Optional; when absent no ordering key is sent.
pub const ORDERING_KEY: &str = "ordering_key";

/// Publish options resolved from a message's option bag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishOptions {
    #[serde(rename = "topic_name")]
    pub topic: String,
    /// `None` when the key is absent, `Some("")` when it is the empty string.
    #[serde(rename = "ordering_key", default)]
    pub ordering_key: Option<String>,
}

impl ResolveOptions for PublishOptions {}

/// Message as handed to the pub/sub client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubSubMessage {
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    pub ordering_key: Option<String>,
}

/// Resolves to the server-assigned message id once the publish is acknowledged.
pub type PublishResult = BoxFuture<'static, Result<String, tower::BoxError>>;

/// The publish capability of a pub/sub client.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Publish handle for one topic.
    type Topic: Send + Sync;

    /// Resolve a handle to the named topic. `ordered` is set when the message
    /// carries an ordering key, for clients that must enable ordering per
    /// handle.
    async fn topic(&self, name: &str, ordered: bool) -> Result<Self::Topic, tower::BoxError>;

    /// Submit `message` for publishing.
    async fn publish(
        &self,
        topic: &Self::Topic,
        message: PubSubMessage,
    ) -> Result<PublishResult, tower::BoxError>;
}

#[async_trait]
impl<T> PubSubClient for Arc<T>
where
    T: PubSubClient + ?Sized,
{
    type Topic = T::Topic;

    async fn topic(&self, name: &str, ordered: bool) -> Result<Self::Topic, tower::BoxError> {
        (**self).topic(name, ordered).await
    }

    async fn publish(
        &self,
        topic: &Self::Topic,
        message: PubSubMessage,
    ) -> Result<PublishResult, tower::BoxError> {
        (**self).publish(topic, message).await
    }
}

/// Pub/sub sink.
///
/// Message headers become string attributes: strings are sent as-is, other
/// values JSON-encoded.
pub struct PubSub<C> {
    client: C,
}

impl<C> PubSub<C> {
    /// Create a new sink over a pub/sub client.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> EventStream for PubSub<C>
where
    C: PubSubClient,
{
    #[tracing::instrument(skip_all, fields(id = ?message.id, topic = tracing::field::Empty))]
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        let options = PublishOptions::resolve(&message.options)?;
        tracing::Span::current().record("topic", options.topic.as_str());

        let topic = until_cancelled(
            cancel,
            Phase::Declare,
            self.client.topic(&options.topic, options.ordering_key.is_some()),
        )
        .await?;

        ensure_active(cancel, Phase::Publish)?;
        let result = self
            .client
            .publish(
                &topic,
                PubSubMessage {
                    data: message.payload.clone(),
                    attributes: attributes(&message.headers),
                    ordering_key: options.ordering_key,
                },
            )
            .await
            .map_err(SinkError::publish)?;

        let message_id = result.await.map_err(SinkError::acknowledgement)?;
        tracing::debug!(%message_id, "Message published to topic");
        Ok(())
    }
}

fn attributes(headers: &DynamicValues) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| (key.clone(), header_text(value)))
        .collect()
}
