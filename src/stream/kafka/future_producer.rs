use async_trait::async_trait;
use rdkafka::{
    ClientConfig,
    error::KafkaResult,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
};

use crate::{
    DynamicValues,
    message::header_text,
    stream::kafka::{ProduceError, ProducerRecord, RecordMetadata, RecordProducer, RequiredAcks},
};

/// [`RecordProducer`] over an rdkafka `FutureProducer`.
///
/// Build it from the same `ClientConfig` the producer is created from, so
/// the configured acknowledgement level can be checked. Delivery is bounded
/// by the producer's `message.timeout.ms`.
#[derive(Clone)]
pub struct FutureRecordProducer {
    producer: FutureProducer,
    acks: RequiredAcks,
}

impl FutureRecordProducer {
    /// Create the producer from `config`.
    pub fn from_config(config: &ClientConfig) -> KafkaResult<Self> {
        Ok(Self {
            producer: config.create()?,
            acks: required_acks(config),
        })
    }
}

#[async_trait]
impl RecordProducer for FutureRecordProducer {
    fn required_acks(&self) -> RequiredAcks {
        self.acks
    }

    async fn produce(&self, record: ProducerRecord<'_>) -> Result<RecordMetadata, ProduceError> {
        let mut future_record = FutureRecord::<[u8], [u8]>::to(record.topic)
            .payload(record.payload)
            .headers(owned_headers(record.headers));
        if let Some(key) = record.key {
            future_record = future_record.key(key);
        }

        let delivery = self
            .producer
            .send_result(future_record)
            .map_err(|(e, _)| ProduceError::Enqueue(e.into()))?;

        let (partition, offset) = delivery
            .await
            .map_err(|canceled| ProduceError::Delivery(canceled.into()))?
            .map_err(|(e, _)| ProduceError::Delivery(e.into()))?;

        Ok(RecordMetadata { partition, offset })
    }
}

/// Header values are UTF-8 text: strings verbatim, other values JSON-encoded.
fn owned_headers(headers: &DynamicValues) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |owned, (key, value)| {
            let text = header_text(value);
            owned.insert(Header {
                key: key.as_str(),
                value: Some(text.as_bytes()),
            })
        })
}

/// librdkafka defaults to `acks=all` when neither alias is set.
fn required_acks(config: &ClientConfig) -> RequiredAcks {
    match config
        .get("acks")
        .or_else(|| config.get("request.required.acks"))
    {
        None | Some("all") | Some("-1") => RequiredAcks::All,
        Some("0") => RequiredAcks::None,
        Some(_) => RequiredAcks::Leader,
    }
}
