//! Value marshaling.
//!
//! Typed values go through a [`Codec`] before they reach the engine. Raw
//! event bytes bypass it and are stored verbatim.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Serialization format for typed values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// MessagePack with named fields (compact, the default).
    #[default]
    MsgPack,
    /// JSON (readable on disk).
    Json,
}

impl Codec {
    /// Encode a value.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::MsgPack => {
                rmp_serde::to_vec_named(value).map_err(|e| StoreError::Encode(Box::new(e)))
            }
            Codec::Json => serde_json::to_vec(value).map_err(|e| StoreError::Encode(Box::new(e))),
        }
    }

    /// Decode a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::MsgPack => {
                rmp_serde::from_slice(bytes).map_err(|e| StoreError::Decode(Box::new(e)))
            }
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(Box::new(e))),
        }
    }
}
