//! Event-stream sink contract and broker adapters.
//!
//! Every backend implements [`EventStream`], a single `send` operation taking
//! an [`OutboxMessage`] and a cancellation signal. Adapters are thin protocol
//! sequences over an externally owned broker client; they never open, close or
//! reconfigure the client itself, and they never retry.
//!
//! ## Key components
//!
//! - [`EventStream`]: the sink contract called by the outbox dispatch loop
//! - [`EventStreamService`]: `tower::Service` adapter over any sink
//! - [`SinkError`]: failure tagged with the [`Phase`] that failed
//!
//! ## Backends
//!
//! - [`amqp`]: exchange-based brokers (declare then publish)
//! - [`kafka`]: log/partition brokers with synchronous acknowledgements
//! - [`kinesis`]: managed streams (put-record)
//! - [`pubsub`]: managed pub/sub topics with optional ordering keys
//! - [`InMemory`]: records messages, for tests

pub mod amqp;
mod inmemory;
pub mod kafka;
pub mod kinesis;
pub mod pubsub;

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing_error::SpanTrace;

use crate::{OutboxMessage, options::OptionsError};

pub use inmemory::InMemory;

/// Sink delivering outbox messages to one broker backend.
///
/// Implementations must be safe to call concurrently from many tasks: all
/// per-send state (resolved options, AMQP channels) is local to the call.
///
/// A send either succeeds, meaning the broker accepted the message, or fails
/// with a [`SinkError`] identifying the phase that failed. Failures are never
/// retried by the sink.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Deliver `message` to the destination described by its options.
    ///
    /// `cancel` is checked before each broker phase and interrupts the broker
    /// calls that prepare the destination. Once a publish has been handed to
    /// the broker client the outcome is awaited regardless, so a delivered
    /// message is never reported as failed.
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError>;
}

#[async_trait]
impl<T> EventStream for Arc<T>
where
    T: EventStream + ?Sized,
{
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        (**self).send(cancel, message).await
    }
}

#[async_trait]
impl<T> EventStream for Box<T>
where
    T: EventStream + ?Sized,
{
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &OutboxMessage,
    ) -> Result<(), SinkError> {
        (**self).send(cancel, message).await
    }
}

/// Step of a send that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Options could not be resolved or the sink was misconfigured. No broker
    /// call was made.
    Configuration,
    /// The destination could not be prepared: channel acquisition, exchange
    /// declaration or topic resolution.
    Declare,
    /// The broker rejected the publish.
    Publish,
    /// The publish was submitted but the broker reported a failure while it
    /// was being acknowledged. Delivery state is unknown.
    Acknowledgement,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Configuration => "configuration",
            Phase::Declare => "declare",
            Phase::Publish => "publish",
            Phase::Acknowledgement => "acknowledgement",
        })
    }
}

/// Error returned by [`EventStream::send`].
///
/// Each error captures:
/// - The [`Phase`] that failed
/// - The underlying cause, unchanged
/// - A tracing span backtrace for improved diagnostics
#[derive(Debug)]
pub struct SinkError {
    context: SpanTrace,
    phase: Phase,
    source: tower::BoxError,
}

impl SinkError {
    fn new(phase: Phase, source: tower::BoxError) -> Self {
        Self {
            context: SpanTrace::capture(),
            phase,
            source,
        }
    }

    /// Create a configuration error.
    pub fn configuration(err: impl Into<tower::BoxError>) -> Self {
        Self::new(Phase::Configuration, err.into())
    }

    /// Create a declare-phase error.
    pub fn declare(err: impl Into<tower::BoxError>) -> Self {
        Self::new(Phase::Declare, err.into())
    }

    /// Create a publish-phase error.
    pub fn publish(err: impl Into<tower::BoxError>) -> Self {
        Self::new(Phase::Publish, err.into())
    }

    /// Create an acknowledgement-phase error.
    pub fn acknowledgement(err: impl Into<tower::BoxError>) -> Self {
        Self::new(Phase::Acknowledgement, err.into())
    }

    /// Create an error for a send cancelled before `phase` started.
    pub fn cancelled(phase: Phase) -> Self {
        Self::new(phase, Box::new(Cancelled))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the send was abandoned because its cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        self.source.is::<Cancelled>()
    }
}

impl From<OptionsError> for SinkError {
    fn from(err: OptionsError) -> Self {
        Self::configuration(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} failed: {}", self.phase, self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Source of a [`SinkError`] raised by a cancelled token.
#[derive(Debug)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("send cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Fail with a cancellation error if `cancel` fired before `phase`.
pub(crate) fn ensure_active(cancel: &CancellationToken, phase: Phase) -> Result<(), SinkError> {
    if cancel.is_cancelled() {
        return Err(SinkError::cancelled(phase));
    }
    Ok(())
}

/// Run a broker call that precedes the publish, abandoning it as soon as
/// `cancel` fires.
///
/// Only for calls that commit nothing: the publish itself is never raced
/// against the token.
pub(crate) async fn until_cancelled<F, T>(
    cancel: &CancellationToken,
    phase: Phase,
    call: F,
) -> Result<T, SinkError>
where
    F: Future<Output = Result<T, tower::BoxError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SinkError::cancelled(phase)),
        result = call => result.map_err(|e| SinkError::new(phase, e)),
    }
}

/// Tower service adapter for an [`EventStream`].
///
/// Lets callers compose tower middleware (timeouts, concurrency limits,
/// buffering) around a sink. Each call runs under a child of the service's
/// cancellation token, so cancelling the token passed to
/// [`with_cancellation`](Self::with_cancellation) abandons in-flight sends
/// that have not yet submitted their publish.
pub struct EventStreamService<S: ?Sized> {
    stream: Arc<S>,
    cancel: CancellationToken,
}

impl<S> EventStreamService<S> {
    /// Create a new service from a sink.
    pub fn new(stream: S) -> Self {
        Self::from_arc(Arc::new(stream))
    }
}

impl<S: ?Sized> EventStreamService<S> {
    /// Create a new service from a shared sink.
    pub fn from_arc(stream: Arc<S>) -> Self {
        Self {
            stream,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` as the parent token of every send.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl<S: ?Sized> Clone for EventStreamService<S> {
    fn clone(&self) -> Self {
        Self {
            stream: Arc::clone(&self.stream),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S> Service<OutboxMessage> for EventStreamService<S>
where
    S: EventStream + ?Sized + 'static,
{
    type Response = ();
    type Error = SinkError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: OutboxMessage) -> Self::Future {
        let stream = Arc::clone(&self.stream);
        let cancel = self.cancel.child_token();

        Box::pin(async move { stream.send(&cancel, &req).await })
    }
}
