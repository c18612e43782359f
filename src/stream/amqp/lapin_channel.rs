use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ExchangeKind,
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
};
use serde_json::Value;

use crate::{
    DynamicValues,
    stream::amqp::{AmqpChannel, ChannelProvider, ExchangeOptions, Publishing},
};

/// Channels are opened on a caller-owned `lapin::Connection`, usually shared
/// as `Arc<Connection>`.
#[async_trait]
impl ChannelProvider for Connection {
    type Channel = Channel;

    async fn open_channel(&self) -> Result<Channel, tower::BoxError> {
        Ok(self.create_channel().await?)
    }
}

#[async_trait]
impl AmqpChannel for Channel {
    async fn declare_exchange(&self, options: &ExchangeOptions) -> Result<(), tower::BoxError> {
        self.exchange_declare(
            &options.exchange,
            exchange_kind(&options.kind),
            ExchangeDeclareOptions {
                passive: false,
                durable: options.durable,
                auto_delete: options.auto_delete,
                internal: options.internal,
                nowait: options.no_wait,
            },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    /// Waits for the publish to be written and, if the channel is in confirm
    /// mode, for the broker's confirmation.
    async fn publish(&self, publishing: Publishing<'_>) -> Result<(), tower::BoxError> {
        let properties = properties(&publishing);

        let _confirmation = self
            .basic_publish(
                publishing.exchange,
                publishing.routing_key,
                BasicPublishOptions {
                    mandatory: publishing.mandatory,
                    immediate: publishing.immediate,
                },
                publishing.body,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }

    async fn release(&self) -> Result<(), tower::BoxError> {
        self.close(200, "OK").await?;
        Ok(())
    }
}

fn properties(publishing: &Publishing<'_>) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(publishing.content_type.to_owned()))
        .with_delivery_mode(publishing.delivery_mode as u8)
        .with_priority(publishing.priority)
        .with_headers(field_table(publishing.headers))
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_owned()),
    }
}

fn field_table(values: &DynamicValues) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in values {
        table.insert(ShortString::from(key.clone()), field_value(value));
    }
    table
}

fn field_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => AMQPValue::LongLongInt(i),
            // Beyond i64::MAX: no unsigned 64-bit field type in AMQP 0-9-1.
            (None, Some(u)) => AMQPValue::LongString(LongString::from(u.to_string())),
            (None, None) => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(field_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => AMQPValue::FieldTable(field_table(map)),
    }
}
