//! Log/partition broker sink with synchronous acknowledgements.
//!
//! [`SyncKafka`] produces one record per send and waits for the broker to
//! acknowledge it. Its contract only holds when the producer waits for every
//! in-sync replica (`acks=all`), so construction rejects any other producer.

#[cfg(feature = "kafka")]
mod future_producer;

#[cfg(feature = "kafka")]
pub use future_producer::FutureRecordProducer;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    DynamicValues, OutboxMessage,
    options::ResolveOptions,
    stream::{EventStream, Phase, SinkError, ensure_active},
};

/// Target topic. Required.
pub const TOPIC: &str = "topic";

/// Topic options resolved from a message's option bag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicOptions {
    #[serde(rename = "topic")]
    pub topic: String,
}

impl ResolveOptions for TopicOptions {}

/// Acknowledgement level a producer was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredAcks {
    /// Fire and forget (`acks=0`).
    None,
    /// Leader only (`acks=1`).
    Leader,
    /// Every in-sync replica (`acks=all`).
    All,
}

/// One record to produce.
#[derive(Debug, Clone, Copy)]
pub struct ProducerRecord<'a> {
    pub topic: &'a str,
    pub key: Option<&'a [u8]>,
    pub payload: &'a [u8],
    /// Message headers, sent as record headers.
    pub headers: &'a DynamicValues,
}

/// Broker-assigned coordinates of a delivered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
}

/// Failure to produce a record.
#[derive(Debug)]
pub enum ProduceError {
    /// The producer refused the record (queue full, message too large, ...).
    Enqueue(tower::BoxError),
    /// The record was submitted but its delivery failed.
    Delivery(tower::BoxError),
}

/// A Kafka producer that delivers one record and waits for its outcome.
#[async_trait]
pub trait RecordProducer: Send + Sync {
    /// Acknowledgement level the producer was configured with.
    fn required_acks(&self) -> RequiredAcks;

    async fn produce(&self, record: ProducerRecord<'_>) -> Result<RecordMetadata, ProduceError>;
}

/// Kafka sink.
///
/// The record key is the message id when there is one, so records for the
/// same entity land on the same partition. Message headers become record
/// headers.
pub struct SyncKafka<P> {
    producer: P,
}

impl<P> SyncKafka<P>
where
    P: RecordProducer,
{
    /// Create a new sink.
    ///
    /// Fails with a [`Phase::Configuration`] error unless the producer waits
    /// for all in-sync replicas.
    pub fn new(producer: P) -> Result<Self, SinkError> {
        match producer.required_acks() {
            RequiredAcks::All => Ok(Self { producer }),
            acks => Err(SinkError::configuration(UnacknowledgedProducer { acks })),
        }
    }
}

#[async_trait]
impl<P> EventStream for SyncKafka<P>
where
    P: RecordProducer,
{
    #[tracing::instrument(skip_all, fields(id = ?message.id, topic = tracing::field::Empty))]
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        let options = TopicOptions::resolve(&message.options)?;
        tracing::Span::current().record("topic", options.topic.as_str());

        let key = message.id.as_ref().map(|id| id.to_string().into_bytes());

        ensure_active(cancel, Phase::Publish)?;
        let metadata = self
            .producer
            .produce(ProducerRecord {
                topic: &options.topic,
                key: key.as_deref(),
                payload: &message.payload,
                headers: &message.headers,
            })
            .await
            .map_err(|e| match e {
                ProduceError::Enqueue(e) => SinkError::publish(e),
                ProduceError::Delivery(e) => SinkError::acknowledgement(e),
            })?;

        tracing::debug!(
            partition = metadata.partition,
            offset = metadata.offset,
            "Record acknowledged"
        );
        Ok(())
    }
}

/// The producer does not wait for all in-sync replicas.
#[derive(Debug)]
pub struct UnacknowledgedProducer {
    acks: RequiredAcks,
}

impl std::fmt::Display for UnacknowledgedProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "producer must wait for all in-sync replicas, got {:?}",
            self.acks
        )
    }
}

impl std::error::Error for UnacknowledgedProducer {}
