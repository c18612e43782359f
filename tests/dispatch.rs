use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outbox_stream::{
    EventStream, EventStreamService, InMemory, OutboxMessage, Phase,
    stream::{
        amqp::{self, Amqp, AmqpChannel, ChannelProvider, ExchangeOptions, Publishing},
        kinesis::{self, Kinesis, PutRecordOutput, PutRecordRequest, StreamClient},
    },
};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};

#[derive(Clone, Default)]
struct Broker {
    declared: Arc<Mutex<Vec<String>>>,
    published: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
    open_channels: Arc<Mutex<i32>>,
}

struct BrokerChannel(Broker);

#[async_trait]
impl ChannelProvider for Broker {
    type Channel = BrokerChannel;

    async fn open_channel(&self) -> Result<BrokerChannel, tower::BoxError> {
        *self.open_channels.lock().unwrap() += 1;
        Ok(BrokerChannel(self.clone()))
    }
}

#[async_trait]
impl AmqpChannel for BrokerChannel {
    async fn declare_exchange(&self, options: &ExchangeOptions) -> Result<(), tower::BoxError> {
        self.0.declared.lock().unwrap().push(options.exchange.clone());
        Ok(())
    }

    async fn publish(&self, publishing: Publishing<'_>) -> Result<(), tower::BoxError> {
        self.0.published.lock().unwrap().push((
            publishing.exchange.to_owned(),
            publishing.routing_key.to_owned(),
            publishing.body.to_vec(),
        ));
        Ok(())
    }

    async fn release(&self) -> Result<(), tower::BoxError> {
        *self.0.open_channels.lock().unwrap() -= 1;
        Ok(())
    }
}

#[derive(Default)]
struct Stream {
    requests: Mutex<Vec<PutRecordRequest>>,
}

#[async_trait]
impl StreamClient for Stream {
    async fn put_record(
        &self,
        request: PutRecordRequest,
    ) -> Result<PutRecordOutput, tower::BoxError> {
        self.requests.lock().unwrap().push(request);
        Ok(PutRecordOutput::default())
    }
}

#[tokio::test]
async fn one_sink_serves_many_destinations() {
    let broker = Broker::default();
    let sink: Box<dyn EventStream> = Box::new(Amqp::new(broker.clone()));
    let cancel = CancellationToken::new();

    for (exchange, key) in [("orders", "orders.created"), ("users", "users.deleted")] {
        let message = OutboxMessage::new(format!("{exchange}:{key}")).with_options([
            (amqp::EXCHANGE_NAME, exchange),
            (amqp::ROUTING_KEY, key),
        ]);
        sink.send(&cancel, &message).await.unwrap();
    }

    assert_eq!(*broker.declared.lock().unwrap(), vec!["orders", "users"]);
    assert_eq!(
        *broker.published.lock().unwrap(),
        vec![
            (
                "orders".to_owned(),
                "orders.created".to_owned(),
                b"orders:orders.created".to_vec()
            ),
            (
                "users".to_owned(),
                "users.deleted".to_owned(),
                b"users:users.deleted".to_vec()
            ),
        ]
    );
    assert_eq!(*broker.open_channels.lock().unwrap(), 0);
}

#[tokio::test]
async fn sinks_ignore_each_others_options() {
    let broker = Broker::default();
    let stream = Arc::new(Stream::default());
    let sinks: Vec<Box<dyn EventStream>> = vec![
        Box::new(Amqp::new(broker.clone())),
        Box::new(Kinesis::new(Arc::clone(&stream))),
    ];

    let message = OutboxMessage::new("payload").with_id(1).with_options([
        (amqp::EXCHANGE_NAME, "events"),
        (kinesis::STREAM_NAME, "events-stream"),
    ]);
    for sink in &sinks {
        sink.send(&CancellationToken::new(), &message).await.unwrap();
    }

    assert_eq!(*broker.declared.lock().unwrap(), vec!["events"]);
    let requests = stream.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].stream_name, "events-stream");
    assert_eq!(requests[0].partition_key, "1");
    assert_eq!(requests[0].data, b"payload");
}

#[tokio::test]
async fn tower_service_delivers_messages() {
    let sink = InMemory::default();
    let service = EventStreamService::new(sink.clone());

    service
        .clone()
        .oneshot(OutboxMessage::new("a"))
        .await
        .unwrap();

    let mut service = service;
    service
        .ready()
        .await
        .unwrap()
        .call(OutboxMessage::new("b"))
        .await
        .unwrap();

    let payloads: Vec<_> = sink
        .sent_messages()
        .await
        .into_iter()
        .map(|m| m.payload)
        .collect();
    assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[tokio::test]
async fn tower_service_honours_parent_cancellation() {
    let sink = InMemory::default();
    let cancel = CancellationToken::new();
    let service = EventStreamService::new(sink.clone()).with_cancellation(cancel.clone());

    cancel.cancel();
    let err = service
        .oneshot(OutboxMessage::new("a"))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.phase(), Phase::Publish);
    assert!(sink.sent_messages().await.is_empty());
}

#[tokio::test]
async fn shared_sink_behind_service() {
    let broker = Broker::default();
    let sink: Arc<dyn EventStream> = Arc::new(Amqp::new(broker.clone()));
    let service = EventStreamService::from_arc(sink);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(
                service
                    .oneshot(OutboxMessage::new(vec![i]).with_option(amqp::EXCHANGE_NAME, "fanout")),
            )
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(broker.published.lock().unwrap().len(), 8);
    assert_eq!(*broker.open_channels.lock().unwrap(), 0);
}
