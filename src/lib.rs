#![doc = include_str!("../README.md")]

pub mod message;
pub mod options;
pub mod stream;

#[doc(inline)]
pub use message::{DynamicValues, MessageId, OutboxMessage};

#[doc(inline)]
pub use options::{OptionsError, ResolveOptions};

#[doc(inline)]
pub use stream::{EventStream, EventStreamService, InMemory, Phase, SinkError};
