//! Managed stream sink (Kinesis-style put-record).

#[cfg(feature = "kinesis")]
mod sdk_client;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    OutboxMessage,
    options::ResolveOptions,
    stream::{EventStream, Phase, SinkError, ensure_active},
};

/// Destination stream name. Required.
pub const STREAM_NAME: &str = "stream_name";

/// Longest partition key the service accepts, in Unicode scalar values.
pub const MAX_PARTITION_KEY_CHARS: usize = 256;

/// Stream options resolved from a message's option bag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamOptions {
    #[serde(rename = "stream_name")]
    pub stream_name: String,
}

impl ResolveOptions for StreamOptions {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordRequest {
    pub stream_name: String,
    pub partition_key: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutRecordOutput {
    pub shard_id: String,
    pub sequence_number: String,
}

/// The put-record capability of a stream service client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn put_record(
        &self,
        request: PutRecordRequest,
    ) -> Result<PutRecordOutput, tower::BoxError>;
}

#[async_trait]
impl<T> StreamClient for Arc<T>
where
    T: StreamClient + ?Sized,
{
    async fn put_record(
        &self,
        request: PutRecordRequest,
    ) -> Result<PutRecordOutput, tower::BoxError> {
        (**self).put_record(request).await
    }
}

/// Stream sink.
///
/// Puts one record per send. The partition key is the message id, which keeps
/// records of one entity ordered within a shard. Ids longer than
/// [`MAX_PARTITION_KEY_CHARS`] are truncated; messages without an id, or with
/// an empty one, get a random key.
pub struct Kinesis<C> {
    client: C,
}

impl<C> Kinesis<C> {
    /// Create a new sink over a stream client.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C> EventStream for Kinesis<C>
where
    C: StreamClient,
{
    #[tracing::instrument(skip_all, fields(id = ?message.id, stream = tracing::field::Empty))]
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        let options = StreamOptions::resolve(&message.options)?;
        tracing::Span::current().record("stream", options.stream_name.as_str());

        let partition_key = partition_key(message);

        ensure_active(cancel, Phase::Publish)?;
        let output = self
            .client
            .put_record(PutRecordRequest {
                stream_name: options.stream_name,
                partition_key,
                data: message.payload.clone(),
            })
            .await
            .map_err(SinkError::publish)?;

        tracing::debug!(
            shard_id = %output.shard_id,
            sequence_number = %output.sequence_number,
            "Record put"
        );
        Ok(())
    }
}

fn partition_key(message: &OutboxMessage) -> String {
    match message.id.as_ref().map(ToString::to_string) {
        Some(id) if !id.is_empty() => id.chars().take(MAX_PARTITION_KEY_CHARS).collect(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}
