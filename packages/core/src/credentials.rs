//! Ed25519 signing keys and multibase verify keys.
//!
//! A [`VerifyKey`] identifies a caller or a service. It renders as a
//! multibase string:
//!
//! ```text
//! z <base58btc( [0xed, 0x01] ++ public_key_bytes )>
//! ```
//!
//! where `[0xed, 0x01]` is the unsigned-varint encoding of the `ed25519-pub`
//! multicodec. This produces the familiar `z6Mk…` prefix.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Errors returned when decoding key material.
#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("multibase key must start with 'z'")]
    MissingMultibasePrefix,
    #[error("base58 decode failed: {0}")]
    Base58(String),
    #[error("missing ed25519 multicodec prefix [0xed, 0x01]")]
    MissingMulticodec,
    #[error("key must be 32 bytes, got {0}")]
    WrongLength(usize),
    #[error("invalid hex seed: {0}")]
    Hex(String),
}

/// A caller's or service's private Ed25519 key.
#[derive(Clone)]
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl SigningKey {
    /// Generate a fresh key using OS randomness.
    pub fn generate() -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore a key from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Restore a key from a hex-encoded 32-byte seed.
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_seed.trim()).map_err(|e| KeyError::Hex(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyError::WrongLength(b.len()))?;
        Ok(Self::from_seed(&seed))
    }

    /// The raw 32-byte seed. **Keep this secret.**
    pub fn seed(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey(self.inner.verifying_key().to_bytes())
    }

    /// Sign `message`, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.inner.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("verify_key", &self.verify_key())
            .finish_non_exhaustive()
    }
}

/// A public Ed25519 verification key.
///
/// Serialises as its multibase string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerifyKey([u8; 32]);

impl VerifyKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `z`-prefixed base58btc with the ed25519 multicodec prefix.
    pub fn to_multibase(&self) -> String {
        let mut prefixed = ED25519_MULTICODEC.to_vec();
        prefixed.extend_from_slice(&self.0);
        format!("z{}", bs58::encode(prefixed).into_string())
    }

    pub fn from_multibase(s: &str) -> Result<Self, KeyError> {
        let data = s.strip_prefix('z').ok_or(KeyError::MissingMultibasePrefix)?;
        let decoded = bs58::decode(data)
            .into_vec()
            .map_err(|e| KeyError::Base58(e.to_string()))?;
        let key = decoded
            .strip_prefix(&ED25519_MULTICODEC[..])
            .ok_or(KeyError::MissingMulticodec)?;
        let bytes: [u8; 32] = key
            .try_into()
            .map_err(|_| KeyError::WrongLength(key.len()))?;
        Ok(Self(bytes))
    }

    /// Check `signature` over `message`. Malformed keys or signatures simply
    /// fail verification.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig_array) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
        verifying_key.verify(message, &signature).is_ok()
    }
}

impl fmt::Display for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_multibase())
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyKey({})", self.to_multibase())
    }
}

impl FromStr for VerifyKey {
    type Err = KeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_multibase(s)
    }
}

impl TryFrom<String> for VerifyKey {
    type Error = KeyError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_multibase(&s)
    }
}

impl From<VerifyKey> for String {
    fn from(key: VerifyKey) -> Self {
        key.to_multibase()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
