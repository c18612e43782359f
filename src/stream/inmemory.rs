use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    OutboxMessage,
    stream::{EventStream, Phase, SinkError, ensure_active},
};

/// In-memory sink for testing or local pipelines.
///
/// Stores every message it is sent in a shared list. Clones share the same
/// list. It is useful for:
/// - Unit and integration testing of dispatch-side code
/// - Running an outbox without a real broker
#[derive(Clone, Default)]
pub struct InMemory {
    sent: Arc<Mutex<Vec<OutboxMessage>>>,
}

impl InMemory {
    /// Return all messages sent so far and clear the internal list.
    pub async fn sent_messages(&self) -> Vec<OutboxMessage> {
        let mut sent = self.sent.lock().await;
        std::mem::take(&mut *sent)
    }
}

#[async_trait]
impl EventStream for InMemory {
    /// "Send" a message by appending it to the in-memory list.
    #[tracing::instrument(skip_all, fields(id = ?message.id))]
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        ensure_active(cancel, Phase::Publish)?;

        self.sent.lock().await.push(message.clone());
        tracing::debug!(payload_len = message.payload.len(), "Message recorded in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_drains_messages() {
        let sink = InMemory::default();
        let cancel = CancellationToken::new();

        sink.send(&cancel, &OutboxMessage::new("a")).await.unwrap();
        sink.clone()
            .send(&cancel, &OutboxMessage::new("b"))
            .await
            .unwrap();

        let sent = sink.sent_messages().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].payload, b"b");
        assert!(sink.sent_messages().await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_send_records_nothing() {
        let sink = InMemory::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sink
            .send(&cancel, &OutboxMessage::new("a"))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(sink.sent_messages().await.is_empty());
    }
}
