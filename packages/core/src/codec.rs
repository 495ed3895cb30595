//! Byte-level codec used by signing and transport.
//!
//! The envelope signs exactly the bytes a [`Codec`] produces, so the codec is
//! the single place where payloads are turned into bytes and back.
//! [`JcsCodec`] is the default: RFC 8785 canonical JSON, which is
//! deterministic: the same logical value always encodes to the same bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
}

/// Turns payloads into bytes and back.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Canonical JSON (RFC 8785) codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JcsCodec;

impl Codec for JcsCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        // Go through serde_json::Value first so map ordering is canonicalised.
        let value = serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        serde_jcs::to_vec(&value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
