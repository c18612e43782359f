use async_trait::async_trait;
use aws_sdk_kinesis::{Client, primitives::Blob};

use crate::stream::kinesis::{PutRecordOutput, PutRecordRequest, StreamClient};

#[async_trait]
impl StreamClient for Client {
    async fn put_record(
        &self,
        request: PutRecordRequest,
    ) -> Result<PutRecordOutput, tower::BoxError> {
        let output = Client::put_record(self)
            .stream_name(request.stream_name)
            .partition_key(request.partition_key)
            .data(Blob::new(request.data))
            .send()
            .await?;

        Ok(PutRecordOutput {
            shard_id: output.shard_id().to_owned(),
            sequence_number: output.sequence_number().to_owned(),
        })
    }
}
