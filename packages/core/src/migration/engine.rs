use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DataProtocol, MigrationError, ObjectVersions, ProtocolVersion, TypeRegistry};
use crate::signature::{Param, Signature, TypeExpr};
use crate::types::{Fields, ObjectValue, Value};

/// Which way a value moves relative to the local, always-latest representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Latest → the wire representation of a protocol (outbound arguments).
    Downgrade,
    /// Wire representation → latest (inbound results).
    Upgrade,
}

enum Target<'a> {
    Protocol(&'a ObjectVersions),
    Latest,
}

/// Downgrades signatures and migrates values between protocol versions.
#[derive(Debug, Default, Clone)]
pub struct ProtocolMigrationEngine {
    registry: Arc<TypeRegistry>,
    protocol: DataProtocol,
}

impl ProtocolMigrationEngine {
    pub fn new(registry: Arc<TypeRegistry>, protocol: DataProtocol) -> Self {
        Self { registry, protocol }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn data_protocol(&self) -> &DataProtocol {
        &self.protocol
    }

    /// Whether a catalog built at `current` must be downgraded to serve a
    /// session that negotiated `negotiated`.
    pub fn needs_downgrade(current: ProtocolVersion, negotiated: ProtocolVersion) -> bool {
        match (current, negotiated) {
            (_, ProtocolVersion::Dev) => false,
            (ProtocolVersion::Dev, ProtocolVersion::Stable(_)) => true,
            (ProtocolVersion::Stable(c), ProtocolVersion::Stable(n)) => c > n,
        }
    }

    pub fn object_versions(
        &self,
        protocol: ProtocolVersion,
    ) -> Result<ObjectVersions, MigrationError> {
        self.protocol.object_versions(protocol, &self.registry)
    }

    /// Rewrite every domain reference in `signature` to the highest variant
    /// `target` understands. Parameter names, kinds and defaults are kept.
    pub fn downgrade_signature(
        &self,
        signature: &Signature,
        target: &ObjectVersions,
    ) -> Result<Signature, MigrationError> {
        let params = signature
            .params
            .iter()
            .map(|p| {
                Ok(Param {
                    ty: self.downgrade_type(&p.ty, target)?,
                    ..p.clone()
                })
            })
            .collect::<Result<Vec<_>, MigrationError>>()?;
        let returns = signature
            .returns
            .as_ref()
            .map(|t| self.downgrade_type(t, target))
            .transpose()?;
        Ok(Signature { params, returns })
    }

    /// Rewrite the domain leaves of `ty` for `target`.
    ///
    /// Unversioned types are left alone. A versioned type the target protocol
    /// does not list at all is an error.
    pub fn downgrade_type(
        &self,
        ty: &TypeExpr,
        target: &ObjectVersions,
    ) -> Result<TypeExpr, MigrationError> {
        Ok(match ty {
            TypeExpr::Any | TypeExpr::Primitive(_) => ty.clone(),
            TypeExpr::Optional(inner) => {
                TypeExpr::Optional(Box::new(self.downgrade_type(inner, target)?))
            }
            TypeExpr::List(inner) => TypeExpr::List(Box::new(self.downgrade_type(inner, target)?)),
            TypeExpr::Map(inner) => TypeExpr::Map(Box::new(self.downgrade_type(inner, target)?)),
            TypeExpr::Union(alts) => TypeExpr::Union(
                alts.iter()
                    .map(|t| self.downgrade_type(t, target))
                    .collect::<Result<_, _>>()?,
            ),
            TypeExpr::Domain(domain) => {
                if !self.registry.is_versioned(&domain.name) {
                    return Ok(ty.clone());
                }
                let max = target
                    .get(&domain.name)
                    .and_then(|versions| versions.last().copied())
                    .ok_or_else(|| MigrationError::TypeNotInProtocol {
                        type_name: domain.name.clone(),
                    })?;
                let variant = self
                    .registry
                    .variant_at_or_below(&domain.name, max)
                    .ok_or_else(|| MigrationError::NoConversionPath {
                        type_name: domain.name.clone(),
                        from: domain.version,
                        to: max,
                    })?;
                TypeExpr::Domain(variant.domain_ref())
            }
        })
    }

    /// Migrate `value` (and everything nested in it) for `protocol`.
    ///
    /// Objects of unregistered types pass through unchanged, but their fields
    /// are still walked.
    pub fn migrate_value(
        &self,
        value: Value,
        direction: Direction,
        protocol: ProtocolVersion,
    ) -> Result<Value, MigrationError> {
        match direction {
            Direction::Upgrade => self.walk(value, &Target::Latest),
            Direction::Downgrade => {
                let versions = self.object_versions(protocol)?;
                self.walk(value, &Target::Protocol(&versions))
            }
        }
    }

    /// [`migrate_value`](Self::migrate_value) over a full argument list.
    pub fn migrate_args(
        &self,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
        direction: Direction,
        protocol: ProtocolVersion,
    ) -> Result<(Vec<Value>, BTreeMap<String, Value>), MigrationError> {
        let versions;
        let target = match direction {
            Direction::Upgrade => Target::Latest,
            Direction::Downgrade => {
                versions = self.object_versions(protocol)?;
                Target::Protocol(&versions)
            }
        };
        let args = args
            .into_iter()
            .map(|v| self.walk(v, &target))
            .collect::<Result<Vec<_>, _>>()?;
        let kwargs = kwargs
            .into_iter()
            .map(|(k, v)| Ok((k, self.walk(v, &target)?)))
            .collect::<Result<BTreeMap<_, _>, MigrationError>>()?;
        Ok((args, kwargs))
    }

    fn walk(&self, value: Value, target: &Target<'_>) -> Result<Value, MigrationError> {
        Ok(match value {
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|v| self.walk(v, target))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => Value::Map(self.walk_fields(entries, target)?),
            Value::Object(object) => Value::Object(self.migrate_object(object, target)?),
            other => other,
        })
    }

    fn walk_fields(&self, fields: Fields, target: &Target<'_>) -> Result<Fields, MigrationError> {
        fields
            .into_iter()
            .map(|(k, v)| Ok((k, self.walk(v, target)?)))
            .collect()
    }

    fn migrate_object(
        &self,
        object: ObjectValue,
        target: &Target<'_>,
    ) -> Result<ObjectValue, MigrationError> {
        let name = object.canonical_name.clone();
        let object = match self.registry.latest_version(&name) {
            None => object,
            Some(latest) => {
                let to = match target {
                    Target::Latest => latest,
                    Target::Protocol(versions) => versions
                        .get(&name)
                        .and_then(|v| v.last().copied())
                        .ok_or(MigrationError::TypeNotInProtocol { type_name: name })?,
                };
                self.registry.migrate_object(object, to)?
            }
        };
        Ok(ObjectValue {
            fields: self.walk_fields(object.fields, target)?,
            canonical_name: object.canonical_name,
            version: object.version,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{FieldOp, TypeDescriptor};
    use crate::signature::{DomainRef, Param};

    /// Widget v2 has field `b`; v3 renamed it to `a`.
    /// Protocol 2 knows Widget v2, protocol 3 knows v2 and v3.
    fn engine() -> ProtocolMigrationEngine {
        let registry = TypeRegistry::builder()
            .register(TypeDescriptor::new("Widget", 2).field("b", TypeExpr::int()))
            .register_migration(
                TypeDescriptor::new("Widget", 3).field("a", TypeExpr::int()),
                vec![FieldOp::rename("a", "b")],
            )
            .build()
            .unwrap();
        let protocol = DataProtocol::new()
            .with_protocol(2, [("Widget", 2)])
            .with_protocol(3, [("Widget", 2), ("Widget", 3)]);
        ProtocolMigrationEngine::new(Arc::new(registry), protocol)
    }

    fn widget_v3(a: i64) -> Value {
        ObjectValue::new("Widget", 3).with_field("a", a).into()
    }

    #[test]
    fn needs_downgrade_rules() {
        use ProtocolVersion::*;
        assert!(ProtocolMigrationEngine::needs_downgrade(Dev, Stable(3)));
        assert!(ProtocolMigrationEngine::needs_downgrade(Stable(3), Stable(2)));
        assert!(!ProtocolMigrationEngine::needs_downgrade(Stable(2), Stable(2)));
        assert!(!ProtocolMigrationEngine::needs_downgrade(Stable(2), Stable(3)));
        assert!(!ProtocolMigrationEngine::needs_downgrade(Dev, Dev));
        assert!(!ProtocolMigrationEngine::needs_downgrade(Stable(3), Dev));
    }

    #[test]
    fn signature_downgrade_rewrites_domain_leaves() {
        let e = engine();
        let sig = Signature::new(vec![
            Param::positional("w", TypeExpr::domain("Widget", 3)),
            Param::keyword("many", TypeExpr::optional(TypeExpr::list(TypeExpr::domain("Widget", 3)))),
            Param::keyword("n", TypeExpr::int()).with_default(),
        ])
        .returning(TypeExpr::domain("Widget", 3));

        let target = e.object_versions(ProtocolVersion::Stable(2)).unwrap();
        let down = e.downgrade_signature(&sig, &target).unwrap();

        let v2 = DomainRef {
            name: "Widget".into(),
            version: 2,
        };
        assert_eq!(down.params[0].ty, TypeExpr::Domain(v2.clone()));
        assert_eq!(down.params[1].ty.domain_refs(), vec![&v2]);
        assert_eq!(down.params[2], sig.params[2]);
        assert_eq!(down.returns, Some(TypeExpr::Domain(v2)));
        assert_eq!(down.param_names(), sig.param_names());
    }

    #[test]
    fn signature_downgrade_to_same_protocol_is_identity() {
        let e = engine();
        let sig = Signature::new(vec![Param::positional("w", TypeExpr::domain("Widget", 3))]);
        let target = e.object_versions(ProtocolVersion::Stable(3)).unwrap();
        assert_eq!(e.downgrade_signature(&sig, &target).unwrap(), sig);
    }

    #[test]
    fn type_missing_from_protocol_is_an_error() {
        let e = engine();
        let mut target = ObjectVersions::new();
        target.insert("Other".into(), [1].into());
        let err = e
            .downgrade_type(&TypeExpr::domain("Widget", 3), &target)
            .unwrap_err();
        assert_eq!(
            err,
            MigrationError::TypeNotInProtocol {
                type_name: "Widget".into()
            }
        );
    }

    #[test]
    fn unversioned_domain_types_untouched() {
        let e = engine();
        let ty = TypeExpr::domain("Dataset", 1);
        assert_eq!(e.downgrade_type(&ty, &ObjectVersions::new()).unwrap(), ty);
    }

    #[test]
    fn value_downgrade_renames_field() {
        let e = engine();
        let down = e
            .migrate_value(widget_v3(5), Direction::Downgrade, ProtocolVersion::Stable(2))
            .unwrap();
        let obj = down.as_object().unwrap();
        assert_eq!(obj.version, 2);
        assert_eq!(obj.get("b"), Some(&Value::Int(5)));
        assert_eq!(obj.get("a"), None);
    }

    #[test]
    fn upgrade_inverts_downgrade() {
        let e = engine();
        let original = Value::List(vec![widget_v3(1), Value::Str("x".into()), widget_v3(2)]);
        let down = e
            .migrate_value(original.clone(), Direction::Downgrade, ProtocolVersion::Stable(2))
            .unwrap();
        assert_ne!(down, original);
        let up = e
            .migrate_value(down, Direction::Upgrade, ProtocolVersion::Stable(2))
            .unwrap();
        assert_eq!(up, original);
    }

    #[test]
    fn nested_objects_are_migrated() {
        let e = engine();
        let holder: Value = ObjectValue::new("Holder", 1)
            .with_field("inner", widget_v3(9))
            .into();
        let down = e
            .migrate_value(holder, Direction::Downgrade, ProtocolVersion::Stable(2))
            .unwrap();
        let inner = down.as_object().unwrap().get("inner").unwrap().as_object().unwrap();
        assert_eq!(inner.version, 2);
        assert_eq!(inner.get("b"), Some(&Value::Int(9)));
    }

    #[test]
    fn dev_protocol_leaves_latest_values_alone() {
        let e = engine();
        let down = e
            .migrate_value(widget_v3(1), Direction::Downgrade, ProtocolVersion::Dev)
            .unwrap();
        assert_eq!(down, widget_v3(1));
    }

    #[test]
    fn migrate_args_covers_keywords() {
        let e = engine();
        let mut kwargs = BTreeMap::new();
        kwargs.insert("w".to_string(), widget_v3(4));
        let (args, kwargs) = e
            .migrate_args(vec![widget_v3(3)], kwargs, Direction::Downgrade, ProtocolVersion::Stable(2))
            .unwrap();
        assert_eq!(args[0].as_object().unwrap().version, 2);
        assert_eq!(kwargs["w"].as_object().unwrap().version, 2);
    }

    #[test]
    fn unknown_protocol_fails_value_downgrade() {
        let e = engine();
        let err = e
            .migrate_value(widget_v3(1), Direction::Downgrade, ProtocolVersion::Stable(7))
            .unwrap_err();
        assert_eq!(err, MigrationError::UnknownProtocol(ProtocolVersion::Stable(7)));
    }
}
