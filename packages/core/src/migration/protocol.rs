use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{MigrationError, ProtocolVersion, TypeRegistry};

/// Canonical type name → the object versions a protocol understands.
pub type ObjectVersions = BTreeMap<String, BTreeSet<u32>>;

/// Which object versions each stable protocol version understands.
///
/// `dev` is never listed explicitly: it always means the latest registered
/// version of every type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProtocol {
    protocols: BTreeMap<u32, ObjectVersions>,
}

impl DataProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: declare that `protocol` understands the given
    /// `(type, version)` pairs. Repeated calls for the same protocol accumulate.
    pub fn with_protocol<S: Into<String>>(
        mut self,
        protocol: u32,
        versions: impl IntoIterator<Item = (S, u32)>,
    ) -> Self {
        let entry = self.protocols.entry(protocol).or_default();
        for (name, version) in versions {
            entry.entry(name.into()).or_default().insert(version);
        }
        self
    }

    /// Every protocol this side can speak, ascending, ending with `dev`.
    pub fn supported(&self) -> Vec<ProtocolVersion> {
        self.protocols
            .keys()
            .copied()
            .map(ProtocolVersion::Stable)
            .chain(std::iter::once(ProtocolVersion::Dev))
            .collect()
    }

    pub fn latest_stable(&self) -> Option<u32> {
        self.protocols.keys().next_back().copied()
    }

    /// The object versions understood by `protocol`.
    ///
    /// For `dev` these are all versions known to `registry`.
    pub fn object_versions(
        &self,
        protocol: ProtocolVersion,
        registry: &TypeRegistry,
    ) -> Result<ObjectVersions, MigrationError> {
        match protocol {
            ProtocolVersion::Dev => Ok(registry
                .names()
                .map(|name| (name.to_string(), registry.versions(name).into_iter().collect()))
                .collect()),
            ProtocolVersion::Stable(n) => self
                .protocols
                .get(&n)
                .cloned()
                .ok_or(MigrationError::UnknownProtocol(protocol)),
        }
    }
}
