//! Core of the sigcall remote-invocation layer.
//!
//! This crate holds everything both sides of a call agree on: the dynamic
//! value model, structural signatures and the validator that checks
//! arguments against them, Ed25519 credentials, the signed envelope that
//! wraps every call and result, and the migration engine that moves
//! signatures and values between protocol versions. It does no I/O; the
//! `sigcall-client` crate builds sessions and proxies on top of it.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Values: [`Value`], [`ObjectValue`], [`RemoteObject`], [`Uid`] |
//! | [`signature`] | [`Signature`], [`Param`], [`TypeExpr`] and the reserved keyword |
//! | [`validation`] | Argument checking via [`validate_call_args`] |
//! | [`credentials`] | [`SigningKey`] and multibase [`VerifyKey`] |
//! | [`codec`] | The [`Codec`] seam and canonical-JSON [`JcsCodec`] |
//! | [`signing`] | [`SignedEnvelope`]: sign, verify, lazily open |
//! | [`migration`] | [`ProtocolVersion`], [`TypeRegistry`], [`ProtocolMigrationEngine`] |
//! | [`render`] | Human-readable signatures |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use sigcall::{JcsCodec, Param, Signature, SignedEnvelope, SigningKey, TypeExpr, Value};
//!
//! let sig = Signature::new(vec![Param::positional("x", TypeExpr::int())]);
//! let checked = sigcall::validate_call_args(vec![Value::Int(3)], Default::default(), &sig)?;
//!
//! let key = SigningKey::generate();
//! let envelope = SignedEnvelope::sign(&checked.args, &key, &JcsCodec)?;
//! assert!(envelope.verify());
//! ```

pub mod codec;
pub mod credentials;
pub mod migration;
pub mod render;
pub mod signature;
pub mod signing;
pub mod types;
pub mod validation;

pub use codec::{Codec, CodecError, JcsCodec};
pub use credentials::{KeyError, SigningKey, VerifyKey};
pub use migration::{
    DataProtocol, Direction, FieldOp, MigrationError, ObjectVersions, ProtocolMigrationEngine,
    ProtocolVersion, TypeDescriptor, TypeRegistry,
};
pub use render::render_signature;
pub use signature::{
    DomainRef, Param, ParamKind, Primitive, Signature, SignatureError, TypeExpr, RESERVED_KEYWORD,
};
pub use signing::{EnvelopeError, SignedEnvelope};
pub use types::{Fields, ObjectValue, RemoteObject, Uid, Value};
pub use validation::{validate_call_args, validate_path, ValidatedArgs, ValidationError};
