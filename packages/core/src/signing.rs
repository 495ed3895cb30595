//! Signed envelopes for calls and results.
//!
//! A [`SignedEnvelope`] carries the signer's [`VerifyKey`], an Ed25519
//! signature, and the **serialised** payload bytes. The signature always
//! covers those exact bytes, never the payload object, so verification does
//! not depend on decode logic: re-encoding a semantically equal payload
//! differently fails verification.
//!
//! Decoding is lazy. [`SignedEnvelope::open`] verifies first and only then
//! decodes, caching the decoded payload so repeated access does not decode
//! again. The cache is never serialised and can only be filled from the
//! signed bytes.

use std::fmt;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{Codec, CodecError};
use crate::credentials::{SigningKey, VerifyKey};

/// Errors returned by [`SignedEnvelope::sign`] and [`SignedEnvelope::open`].
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("envelope signature verification failed")]
    InvalidSignature,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A signed, serialised payload.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignedEnvelope<T> {
    #[serde(rename = "credentials")]
    verify_key: VerifyKey,
    #[serde(with = "multibase_bytes")]
    signature: Vec<u8>,
    #[serde(rename = "serialized_message", with = "hex_bytes")]
    payload: Vec<u8>,
    #[serde(skip)]
    cache: OnceLock<T>,
}

impl<T> SignedEnvelope<T> {
    /// Serialise `payload` with `codec` and sign the resulting bytes.
    pub fn sign<C: Codec>(payload: &T, key: &SigningKey, codec: &C) -> Result<Self, EnvelopeError>
    where
        T: Serialize,
    {
        let bytes = codec.encode(payload)?;
        let signature = key.sign(&bytes);
        Ok(Self::from_parts(key.verify_key(), signature, bytes))
    }

    /// Reassemble an envelope received from the wire. Nothing is checked
    /// until [`verify`](Self::verify) or [`open`](Self::open).
    pub fn from_parts(verify_key: VerifyKey, signature: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            verify_key,
            signature,
            payload,
            cache: OnceLock::new(),
        }
    }

    /// Whether the signature covers the stored payload bytes under the stored
    /// verify key.
    pub fn verify(&self) -> bool {
        self.verify_key.verify(&self.payload, &self.signature)
    }

    /// Verify, then decode the payload (once).
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::InvalidSignature`] if verification fails; nothing is decoded.
    /// - [`EnvelopeError::Codec`] if the verified bytes do not decode as `T`.
    pub fn open<C: Codec>(&self, codec: &C) -> Result<&T, EnvelopeError>
    where
        T: DeserializeOwned,
    {
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }
        if !self.verify() {
            return Err(EnvelopeError::InvalidSignature);
        }
        let decoded: T = codec.decode(&self.payload)?;
        Ok(self.cache.get_or_init(|| decoded))
    }

    pub fn signer(&self) -> &VerifyKey {
        &self.verify_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (VerifyKey, Vec<u8>, Vec<u8>) {
        (self.verify_key, self.signature, self.payload)
    }
}

impl<T> Clone for SignedEnvelope<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.verify_key, self.signature.clone(), self.payload.clone())
    }
}

impl<T> fmt::Debug for SignedEnvelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedEnvelope")
            .field("signer", &self.verify_key)
            .field("signature_len", &self.signature.len())
            .field("payload_len", &self.payload.len())
            .field("decoded", &self.cache.get().is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// `z`-prefixed base58btc, the same encoding used for verify keys.
mod multibase_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("z{}", bs58::encode(bytes).into_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        let data = s
            .strip_prefix('z')
            .ok_or_else(|| serde::de::Error::custom("signature must start with 'z'"))?;
        bs58::decode(data)
            .into_vec()
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JcsCodec;
    use crate::types::{ObjectValue, Value};

    fn payload() -> Value {
        ObjectValue::new("Widget", 3).with_field("a", 1).into()
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let key = SigningKey::generate();
        let env = SignedEnvelope::sign(&payload(), &key, &JcsCodec).unwrap();
        assert!(env.verify());
        assert_eq!(env.signer(), &key.verify_key());
        assert_eq!(env.open(&JcsCodec).unwrap(), &payload());
    }

    #[test]
    fn flipping_any_payload_byte_fails_verification() {
        let key = SigningKey::generate();
        let env = SignedEnvelope::sign(&payload(), &key, &JcsCodec).unwrap();
        let (vk, sig, bytes) = env.into_parts();
        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let env = SignedEnvelope::<Value>::from_parts(vk, sig.clone(), tampered);
            assert!(!env.verify(), "flip at byte {i} still verified");
        }
    }

    #[test]
    fn substituted_verify_key_fails() {
        let key = SigningKey::generate();
        let env = SignedEnvelope::sign(&payload(), &key, &JcsCodec).unwrap();
        let (_, sig, bytes) = env.into_parts();
        let other = SigningKey::generate().verify_key();
        let env = SignedEnvelope::<Value>::from_parts(other, sig, bytes);
        assert!(!env.verify());
        assert_eq!(env.open(&JcsCodec), Err(EnvelopeError::InvalidSignature));
    }

    #[test]
    fn different_serialisation_of_equal_value_fails() {
        let key = SigningKey::generate();
        let env = SignedEnvelope::sign(&payload(), &key, &JcsCodec).unwrap();
        let (vk, sig, _) = env.into_parts();
        // Pretty-printed JSON decodes to the same value but is different bytes.
        let pretty = serde_json::to_vec_pretty(&payload()).unwrap();
        let env = SignedEnvelope::<Value>::from_parts(vk, sig, pretty);
        assert!(!env.verify());
    }

    #[test]
    fn open_caches_decoded_payload() {
        let key = SigningKey::generate();
        let env = SignedEnvelope::sign(&payload(), &key, &JcsCodec).unwrap();
        let first = env.open(&JcsCodec).unwrap() as *const Value;
        let second = env.open(&JcsCodec).unwrap() as *const Value;
        assert_eq!(first, second);
    }

    #[test]
    fn wire_roundtrip_preserves_bytes() {
        let key = SigningKey::generate();
        let env = SignedEnvelope::sign(&payload(), &key, &JcsCodec).unwrap();
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"credentials\":\"z6Mk"));
        let back: SignedEnvelope<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload_bytes(), env.payload_bytes());
        assert!(back.verify());
    }
}
