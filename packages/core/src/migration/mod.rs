//! Protocol versions and migration of signatures and values between them.
//!
//! Two version axes are involved:
//!
//! | Axis | Where it lives | Example |
//! |------|----------------|---------|
//! | Protocol version | negotiated per session | `2`, `3`, `dev` |
//! | Object version | per canonical type name | `Widget` v2, `Widget` v3 |
//!
//! A [`DataProtocol`] maps each protocol version to the object versions it
//! understands. A [`TypeRegistry`] holds each type's version history with
//! the converters between adjacent versions. The [`ProtocolMigrationEngine`]
//! combines both to downgrade signatures and to move values between the
//! always-latest local representation and a protocol's wire representation.

mod engine;
mod protocol;
mod registry;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{Direction, ProtocolMigrationEngine};
pub use protocol::{DataProtocol, ObjectVersions};
pub use registry::{
    Converter, FieldDescriptor, FieldOp, TypeDescriptor, TypeRegistry, TypeRegistryBuilder,
};

/// Errors raised while migrating signatures or values.
#[derive(Debug, Error, PartialEq)]
pub enum MigrationError {
    #[error("protocol version {0} is not known to this data protocol")]
    UnknownProtocol(ProtocolVersion),

    #[error("type `{type_name}` does not exist in the target protocol")]
    TypeNotInProtocol { type_name: String },

    #[error("no conversion registered for `{type_name}` from v{from} to v{to}")]
    NoConversionPath {
        type_name: String,
        from: u32,
        to: u32,
    },

    #[error("`{type_name}` v{version} is not registered")]
    UnknownVersion { type_name: String, version: u32 },

    #[error("`{type_name}` v{version} is registered twice")]
    DuplicateVersion { type_name: String, version: u32 },

    #[error("`{type_name}` has no field `{field}` to migrate")]
    MissingField { type_name: String, field: String },

    #[error("migration of `{type_name}` failed: {message}")]
    Converter { type_name: String, message: String },
}

/// A negotiated protocol version: a small integer, or the `dev` sentinel which
/// is newer than every stable version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    Stable(u32),
    Dev,
}

impl ProtocolVersion {
    pub const DEV_LABEL: &'static str = "dev";

    pub fn is_dev(&self) -> bool {
        matches!(self, ProtocolVersion::Dev)
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ProtocolVersion::Stable(a), ProtocolVersion::Stable(b)) => a.cmp(b),
            (ProtocolVersion::Stable(_), ProtocolVersion::Dev) => Ordering::Less,
            (ProtocolVersion::Dev, ProtocolVersion::Stable(_)) => Ordering::Greater,
            (ProtocolVersion::Dev, ProtocolVersion::Dev) => Ordering::Equal,
        }
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Stable(n) => write!(f, "{n}"),
            ProtocolVersion::Dev => write!(f, "{}", Self::DEV_LABEL),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::DEV_LABEL {
            return Ok(ProtocolVersion::Dev);
        }
        s.parse::<u32>()
            .map(ProtocolVersion::Stable)
            .map_err(|_| format!("unknown protocol version {s:?}; expected an integer or \"dev\""))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(v: ProtocolVersion) -> Self {
        v.to_string()
    }
}
