//! Version histories of domain types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::MigrationError;
use crate::signature::{DomainRef, TypeExpr};
use crate::types::{Fields, ObjectValue, Value};

/// Converts an object's fields between two adjacent versions.
pub type Converter = Arc<dyn Fn(Fields) -> Result<Fields, MigrationError> + Send + Sync>;

/// One declared field of a domain type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeExpr,
}

/// The shape of one version of a domain type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub canonical_name: String,
    pub version: u32,
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn new(canonical_name: impl Into<String>, version: u32) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            version,
            fields: Vec::new(),
        }
    }

    /// Builder-style field declaration.
    pub fn field(mut self, name: impl Into<String>, ty: TypeExpr) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn domain_ref(&self) -> DomainRef {
        DomainRef {
            name: self.canonical_name.clone(),
            version: self.version,
        }
    }
}

/// A declarative field change between a version and the one before it.
///
/// Ops describe the **downgrade** (newer → older). The upgrade is derived by
/// applying the inverse of each op in reverse order, so every type migrated
/// with ops has a matching up/down pair.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Field `from` at the newer version is called `to` at the older one.
    Rename { from: String, to: String },
    /// Field exists only at the newer version. `default` restores it on upgrade.
    Remove { name: String, default: Value },
    /// Field exists only at the older version. `default` fills it on downgrade.
    Add { name: String, default: Value },
}

impl FieldOp {
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        FieldOp::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn remove(name: impl Into<String>, default: impl Into<Value>) -> Self {
        FieldOp::Remove {
            name: name.into(),
            default: default.into(),
        }
    }

    pub fn add(name: impl Into<String>, default: impl Into<Value>) -> Self {
        FieldOp::Add {
            name: name.into(),
            default: default.into(),
        }
    }

    fn downgrade(&self, type_name: &str, fields: &mut Fields) -> Result<(), MigrationError> {
        match self {
            FieldOp::Rename { from, to } => rename_field(type_name, fields, from, to),
            FieldOp::Remove { name, .. } => {
                fields.remove(name);
                Ok(())
            }
            FieldOp::Add { name, default } => {
                fields.entry(name.clone()).or_insert_with(|| default.clone());
                Ok(())
            }
        }
    }

    fn upgrade(&self, type_name: &str, fields: &mut Fields) -> Result<(), MigrationError> {
        match self {
            FieldOp::Rename { from, to } => rename_field(type_name, fields, to, from),
            FieldOp::Remove { name, default } => {
                fields.entry(name.clone()).or_insert_with(|| default.clone());
                Ok(())
            }
            FieldOp::Add { name, .. } => {
                fields.remove(name);
                Ok(())
            }
        }
    }
}

fn rename_field(
    type_name: &str,
    fields: &mut Fields,
    from: &str,
    to: &str,
) -> Result<(), MigrationError> {
    let value = fields.remove(from).ok_or_else(|| MigrationError::MissingField {
        type_name: type_name.to_string(),
        field: from.to_string(),
    })?;
    fields.insert(to.to_string(), value);
    Ok(())
}

/// Build the `(upgrade, downgrade)` converter pair for a list of ops.
fn converters_from_ops(type_name: &str, ops: Vec<FieldOp>) -> (Converter, Converter) {
    let ops = Arc::new(ops);
    let name = type_name.to_string();

    let down_ops = Arc::clone(&ops);
    let down_name = name.clone();
    let downgrade: Converter = Arc::new(move |mut fields: Fields| {
        for op in down_ops.iter() {
            op.downgrade(&down_name, &mut fields)?;
        }
        Ok(fields)
    });

    let upgrade: Converter = Arc::new(move |mut fields: Fields| {
        for op in ops.iter().rev() {
            op.upgrade(&name, &mut fields)?;
        }
        Ok(fields)
    });

    (upgrade, downgrade)
}

struct VersionEntry {
    descriptor: TypeDescriptor,
    /// Previous registered version → this one.
    upgrade: Option<Converter>,
    /// This version → previous registered version.
    downgrade: Option<Converter>,
}

impl fmt::Debug for VersionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionEntry")
            .field("descriptor", &self.descriptor)
            .field("upgrade", &self.upgrade.is_some())
            .field("downgrade", &self.downgrade.is_some())
            .finish()
    }
}

/// Immutable version histories of every versioned domain type.
///
/// Built once with [`TypeRegistry::builder`] and shared read-only afterwards.
/// Types that are not registered are unversioned.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, BTreeMap<u32, VersionEntry>>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    pub fn is_versioned(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Registered versions of `name`, ascending.
    pub fn versions(&self, name: &str) -> Vec<u32> {
        self.types
            .get(name)
            .map(|h| h.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest_version(&self, name: &str) -> Option<u32> {
        self.types
            .get(name)
            .and_then(|h| h.keys().next_back().copied())
    }

    pub fn descriptor(&self, name: &str, version: u32) -> Option<&TypeDescriptor> {
        self.types
            .get(name)
            .and_then(|h| h.get(&version))
            .map(|e| &e.descriptor)
    }

    /// Resolve a signature's domain reference to its descriptor.
    pub fn resolve(&self, domain: &DomainRef) -> Option<&TypeDescriptor> {
        self.descriptor(&domain.name, domain.version)
    }

    /// The variant registered for the highest version `<= target`.
    pub fn variant_at_or_below(&self, name: &str, target: u32) -> Option<&TypeDescriptor> {
        self.types
            .get(name)
            .and_then(|h| h.range(..=target).next_back())
            .map(|(_, e)| &e.descriptor)
    }

    /// Step `object` one version at a time until it reaches the highest
    /// registered version `<= target`. Unversioned objects are returned as is.
    pub fn migrate_object(
        &self,
        object: ObjectValue,
        target: u32,
    ) -> Result<ObjectValue, MigrationError> {
        let Some(history) = self.types.get(&object.canonical_name) else {
            return Ok(object);
        };
        let ObjectValue {
            canonical_name,
            version: start,
            mut fields,
        } = object;

        if !history.contains_key(&start) {
            return Err(MigrationError::UnknownVersion {
                type_name: canonical_name,
                version: start,
            });
        }
        let no_path = |from: u32, to: u32| MigrationError::NoConversionPath {
            type_name: canonical_name.clone(),
            from,
            to,
        };
        let goal = history
            .range(..=target)
            .next_back()
            .map(|(v, _)| *v)
            .ok_or_else(|| no_path(start, target))?;

        let mut version = start;
        while version > goal {
            let (prev, _) = history
                .range(..version)
                .next_back()
                .ok_or_else(|| no_path(version, goal))?;
            let entry = &history[&version];
            let downgrade = entry
                .downgrade
                .as_ref()
                .ok_or_else(|| no_path(version, *prev))?;
            fields = downgrade(fields)?;
            version = *prev;
        }
        while version < goal {
            let (next, entry) = history
                .range(version + 1..)
                .next()
                .ok_or_else(|| no_path(version, goal))?;
            let upgrade = entry
                .upgrade
                .as_ref()
                .ok_or_else(|| no_path(version, *next))?;
            fields = upgrade(fields)?;
            version = *next;
        }

        Ok(ObjectValue {
            canonical_name,
            version,
            fields,
        })
    }
}

/// Collects version entries and produces an immutable [`TypeRegistry`].
#[derive(Default)]
pub struct TypeRegistryBuilder {
    types: BTreeMap<String, BTreeMap<u32, VersionEntry>>,
    duplicates: Vec<(String, u32)>,
}

impl TypeRegistryBuilder {
    /// Register a version with no converters to its neighbours.
    pub fn register(self, descriptor: TypeDescriptor) -> Self {
        self.register_with(descriptor, None, None)
    }

    /// Register a version whose difference from the previous registered
    /// version is described by `ops` (see [`FieldOp`]).
    pub fn register_migration(self, descriptor: TypeDescriptor, ops: Vec<FieldOp>) -> Self {
        let (upgrade, downgrade) = converters_from_ops(&descriptor.canonical_name, ops);
        self.register_with(descriptor, Some(upgrade), Some(downgrade))
    }

    /// Register a version with hand-written converters.
    pub fn register_with(
        mut self,
        descriptor: TypeDescriptor,
        upgrade: Option<Converter>,
        downgrade: Option<Converter>,
    ) -> Self {
        let name = descriptor.canonical_name.clone();
        let version = descriptor.version;
        let history = self.types.entry(name.clone()).or_default();
        if history.contains_key(&version) {
            self.duplicates.push((name, version));
        } else {
            history.insert(
                version,
                VersionEntry {
                    descriptor,
                    upgrade,
                    downgrade,
                },
            );
        }
        self
    }

    pub fn build(self) -> Result<TypeRegistry, MigrationError> {
        if let Some((type_name, version)) = self.duplicates.into_iter().next() {
            return Err(MigrationError::DuplicateVersion { type_name, version });
        }
        Ok(TypeRegistry { types: self.types })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
