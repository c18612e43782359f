//! Typed decoding of the per-message option bag.
//!
//! Every sink owns a namespace of option keys. Before touching the broker a
//! sink decodes the bag into its own options struct through
//! [`ResolveOptions`]:
//!
//! - recognized keys are coerced to the declared type
//! - absent keys fall back to the struct's serde defaults
//! - unknown keys are ignored
//! - a present key with the wrong type, or a missing required key, is an
//!   [`OptionsError`]
//!
//! Options are resolved fresh on every send and never cached.

use serde::de::DeserializeOwned;
use tracing_error::SpanTrace;

use crate::DynamicValues;

/// Decode a typed options struct out of a [`DynamicValues`] bag.
///
/// Implementors are plain `Deserialize` structs; the provided method does the
/// work.
pub trait ResolveOptions: DeserializeOwned {
    fn resolve(values: &DynamicValues) -> Result<Self, OptionsError> {
        serde_json::from_value(serde_json::Value::Object(values.clone()))
            .map_err(OptionsError::decode)
    }
}

/// The option bag could not be decoded into a sink's options.
#[derive(Debug)]
pub struct OptionsError {
    context: SpanTrace,
    source: serde_json::Error,
}

impl OptionsError {
    fn decode(source: serde_json::Error) -> Self {
        Self {
            context: SpanTrace::capture(),
            source,
        }
    }
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Invalid options: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for OptionsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
