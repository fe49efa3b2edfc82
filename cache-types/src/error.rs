//! Error types for roomcache payloads.

use thiserror::Error;

/// Errors that can occur while handling sync payloads.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON decoding of a sync payload failed
    #[error("invalid sync payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// JSON encoding failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}
