//! Payload diagnostics

use thiserror::Error;

/// Result type for payload parsing
pub type PayloadResult<T> = Result<T, PayloadError>;

/// Reasons a `data:` payload could not be turned into an event.
///
/// None of these are fatal: the offending payload is skipped and the
/// stream keeps going.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload is not JSON at all
    #[error("Payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload is JSON but carries no string `type` discriminator
    #[error("Payload has no string \"type\" field")]
    MissingType,

    /// The discriminator names an event this client does not know
    #[error("Unknown event type: {0}")]
    UnknownType(String),

    /// A known event type with fields of the wrong shape
    #[error("Invalid '{kind}' event: {source}")]
    InvalidShape {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PayloadError {
    /// Short label used in log fields
    pub fn label(&self) -> &'static str {
        match self {
            PayloadError::Malformed(_) => "malformed",
            PayloadError::MissingType => "missing_type",
            PayloadError::UnknownType(_) => "unknown_type",
            PayloadError::InvalidShape { .. } => "invalid_shape",
        }
    }
}
