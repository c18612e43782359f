/// Loosely-typed key/value bag carried on every [`OutboxMessage`].
///
/// Used both for message headers and for per-destination options. Each
/// sink reads only the keys in its own namespace and ignores the rest.
pub type DynamicValues = serde_json::Map<String, serde_json::Value>;

/// Header value for backends whose headers are plain strings: strings are
/// kept verbatim, anything else is JSON-encoded.
pub(crate) fn header_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identifier of an outbox row.
///
/// Only used for correlation: sinks log it and, where the backend supports
/// it, derive a partition key from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Int(id) => write!(f, "{id}"),
            MessageId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        MessageId::Int(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId::Str(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId::Str(value.to_owned())
    }
}

/// Unit of work handed to an [`EventStream`](crate::EventStream).
///
/// The message is owned by the dispatch loop and read-only to sinks:
///
/// - `payload` is sent verbatim as the message body
/// - `headers` are forwarded as broker metadata where the backend has them
/// - `options` carry backend-specific routing and delivery instructions for
///   this one send
///
/// ## Example
///
/// ```rust
/// use outbox_stream::OutboxMessage;
///
/// let message = OutboxMessage::new("test payload")
///     .with_id(10)
///     .with_option("exchange.name", "orders")
///     .with_option("routing_key", "orders.created")
///     .with_header("content-version", 2);
///
/// assert_eq!(message.payload, b"test payload");
/// assert_eq!(message.options.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutboxMessage {
    /// Correlation identifier.
    #[serde(default)]
    pub id: Option<MessageId>,
    /// Raw message body.
    pub payload: Vec<u8>,
    /// Message metadata.
    #[serde(default)]
    pub headers: DynamicValues,
    /// Per-send destination options.
    #[serde(default)]
    pub options: DynamicValues,
}

impl OutboxMessage {
    /// Create a message with the given payload and no id, headers or options.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Extend the option bag with every entry of `options`.
    pub fn with_options<K, V>(mut self, options: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.options
            .extend(options.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
