use std::collections::HashMap;

use async_trait::async_trait;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::{client::Client, publisher::Publisher};
use tokio::sync::Mutex;

use crate::stream::pubsub::{PubSubClient, PubSubMessage, PublishResult};

/// [`PubSubClient`] over a Google Cloud Pub/Sub `Client`.
///
/// Publishers batch in background tasks, so one is kept per topic and
/// reused across sends. Call [`shutdown`](Self::shutdown) to flush and stop
/// them.
///
/// The Pub/Sub wire message has no "unset" ordering key: an absent key and an
/// empty one are both sent as `""`, which the service treats as unordered.
/// Ordering is enabled per message by its key, so the `ordered` flag of
/// [`topic`](PubSubClient::topic) is not used.
pub struct GcpPubSub {
    client: Client,
    publishers: Mutex<HashMap<String, Publisher>>,
}

impl GcpPubSub {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Flush and stop every cached publisher.
    pub async fn shutdown(&self) {
        let mut publishers = self.publishers.lock().await;
        for (_, mut publisher) in publishers.drain() {
            publisher.shutdown().await;
        }
    }
}

#[async_trait]
impl PubSubClient for GcpPubSub {
    type Topic = Publisher;

    async fn topic(&self, name: &str, _ordered: bool) -> Result<Publisher, tower::BoxError> {
        let mut publishers = self.publishers.lock().await;
        if let Some(publisher) = publishers.get(name) {
            return Ok(publisher.clone());
        }

        let publisher = self.client.topic(name).new_publisher(None);
        publishers.insert(name.to_owned(), publisher.clone());
        Ok(publisher)
    }

    async fn publish(
        &self,
        topic: &Publisher,
        message: PubSubMessage,
    ) -> Result<PublishResult, tower::BoxError> {
        let awaiter = topic.publish(wire_message(message)).await;

        Ok(Box::pin(async move { awaiter.get().await.map_err(Into::into) }))
    }
}

fn wire_message(message: PubSubMessage) -> PubsubMessage {
    PubsubMessage {
        data: message.data,
        attributes: message.attributes,
        ordering_key: message.ordering_key.unwrap_or_default(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_empty_ordering_keys_look_the_same_on_the_wire() {
        let absent = wire_message(PubSubMessage::default());
        let empty = wire_message(PubSubMessage {
            ordering_key: Some(String::new()),
            ..Default::default()
        });
        let keyed = wire_message(PubSubMessage {
            data: b"x".to_vec(),
            attributes: HashMap::from([("v".to_owned(), "1".to_owned())]),
            ordering_key: Some("order-1".into()),
        });

        assert_eq!(absent.ordering_key, "");
        assert_eq!(empty.ordering_key, "");
        assert_eq!(keyed.ordering_key, "order-1");
        assert_eq!(keyed.data, b"x");
        assert_eq!(keyed.attributes["v"], "1");
    }
}
