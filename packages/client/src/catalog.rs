//! Building and checking [`EndpointCatalog`]s.
//!
//! [`build_catalog`] runs on the service side of a handshake: it asks an
//! [`Authority`] what the caller may see and produces the immutable catalog
//! for the negotiated protocol. [`validate_catalog`] runs on the client side
//! before any proxy is built from a received catalog.
//!
//! | Source | Dispatch path | Catalog key |
//! |--------|---------------|-------------|
//! | service config at `p` | `p` | `p` |
//! | library config at `m` | [`LIB_DISPATCH_PATH`] | `m` |
//! | user code named `f` | [`USER_CODE_PATH`] | `code.call_f` |

use sigcall::{validate_path, ProtocolMigrationEngine, ProtocolVersion, Signature, Uid, VerifyKey};
use sigcall_api::{EndpointCatalog, EndpointDescriptor, LibEndpointDescriptor};
use tracing::debug;

use crate::authority::{Authority, WarningContext};
use crate::error::ApiError;

/// Generic operation every library call is routed through.
pub const LIB_DISPATCH_PATH: &str = "action.execute";

/// Dispatch path of every user-code function.
pub const USER_CODE_PATH: &str = "code.call";

/// Pre-bound keyword carrying a user-code function's id.
pub const USER_CODE_ID_ARG: &str = "uid";

/// The service a catalog is built for.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub id: Uid,
    pub name: String,
    /// The protocol version the service's own signatures are written at.
    pub protocol: ProtocolVersion,
    pub enable_warnings: bool,
}

/// Build the catalog `caller` may see at the `negotiated` protocol.
///
/// Signatures are downgraded when the service is newer than `negotiated`.
///
/// # Errors
///
/// Any [`Authority`] failure is fatal. So is a malformed path, a
/// signature declaring the reserved keyword, or a type with no variant in
/// the negotiated protocol.
pub fn build_catalog(
    authority: &dyn Authority,
    service: &ServiceInfo,
    caller: &VerifyKey,
    negotiated: ProtocolVersion,
    engine: &ProtocolMigrationEngine,
) -> Result<EndpointCatalog, ApiError> {
    let role = authority.role_for(caller)?;
    let mut catalog = EndpointCatalog::new(service.id, &service.name, negotiated, role);

    let target = if ProtocolMigrationEngine::needs_downgrade(service.protocol, negotiated) {
        Some(engine.object_versions(negotiated)?)
    } else {
        None
    };
    let adapt = |path: &str, signature: &Signature| -> Result<Signature, ApiError> {
        validate_path(path).map_err(|_| ApiError::InvalidPath(path.to_string()))?;
        signature
            .check()
            .map_err(|e| ApiError::from_signature(path, e))?;
        match &target {
            Some(versions) => Ok(engine.downgrade_signature(signature, versions)?),
            None => Ok(signature.clone()),
        }
    };

    let warning_ctx = WarningContext {
        role,
        service_name: service.name.clone(),
        enable_warnings: service.enable_warnings,
    };

    for (path, config) in authority.service_configs(role)? {
        if config.is_from_lib {
            continue;
        }
        let mut endpoint = EndpointDescriptor::new(&path, adapt(&path, &config.signature)?)
            .with_name(&config.public_name);
        endpoint.doc_string = config.doc_string;
        endpoint.warning = config.warning.map(|w| w.render(&warning_ctx));
        catalog.endpoints.insert(path, endpoint);
    }

    for (path, config) in authority.lib_configs(caller)? {
        let mut endpoint =
            EndpointDescriptor::new(LIB_DISPATCH_PATH, adapt(&path, &config.signature)?)
                .with_module_path(&path)
                .with_name(&config.public_name);
        endpoint.doc_string = config.doc_string;
        catalog
            .lib_endpoints
            .insert(path, LibEndpointDescriptor::new(endpoint));
    }

    for code in authority.user_code(caller)? {
        let key = format!("{USER_CODE_PATH}_{}", code.func_name);
        let endpoint = EndpointDescriptor::new(USER_CODE_PATH, adapt(&key, &code.signature)?)
            .with_name(&code.func_name)
            .with_doc(format!("User code function {}", code.func_name))
            .with_prebound(USER_CODE_ID_ARG, code.id);
        catalog.endpoints.insert(key, endpoint);
    }

    debug!(
        service = %service.name,
        %role,
        protocol = %negotiated,
        endpoints = catalog.endpoints.len(),
        lib_endpoints = catalog.lib_endpoints.len(),
        "catalog built"
    );
    Ok(catalog)
}

/// Check a received catalog before building proxies from it.
pub fn validate_catalog(catalog: &EndpointCatalog) -> Result<(), ApiError> {
    let all = catalog
        .endpoints
        .iter()
        .chain(catalog.lib_endpoints.iter().map(|(k, v)| (k, &**v)));
    for (key, endpoint) in all {
        for path in [&endpoint.service_path, &endpoint.module_path] {
            validate_path(path).map_err(|_| ApiError::InvalidPath(path.clone()))?;
        }
        endpoint
            .signature
            .check()
            .map_err(|e| ApiError::from_signature(key, e))?;
    }
    Ok(())
}

/// Whether `endpoint` is a user-code function, and if so its id.
pub fn user_code_id(endpoint: &EndpointDescriptor) -> Option<Uid> {
    if endpoint.service_path != USER_CODE_PATH {
        return None;
    }
    endpoint.prebound.get(USER_CODE_ID_ARG)?.as_uid()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use sigcall::{
        DataProtocol, FieldOp, Param, SigningKey, TypeDescriptor, TypeExpr, TypeRegistry,
        RESERVED_KEYWORD,
    };
    use sigcall_api::Role;

    use super::*;
    use crate::authority::{AuthorityError, LibConfig, ServiceConfig, UserCode, WarningTemplate};

    struct Fixed {
        services: BTreeMap<String, ServiceConfig>,
        libs: BTreeMap<String, LibConfig>,
        code: Vec<UserCode>,
    }

    impl Authority for Fixed {
        fn role_for(&self, _: &VerifyKey) -> Result<Role, AuthorityError> {
            Ok(Role::DataScientist)
        }
        fn service_configs(&self, _: Role) -> Result<BTreeMap<String, ServiceConfig>, AuthorityError> {
            Ok(self.services.clone())
        }
        fn lib_configs(&self, _: &VerifyKey) -> Result<BTreeMap<String, LibConfig>, AuthorityError> {
            Ok(self.libs.clone())
        }
        fn user_code(&self, _: &VerifyKey) -> Result<Vec<UserCode>, AuthorityError> {
            Ok(self.code.clone())
        }
    }

    fn authority() -> Fixed {
        let mut services = BTreeMap::new();
        services.insert(
            "widget.update".to_string(),
            ServiceConfig::new(
                "update",
                Signature::new(vec![Param::positional("w", TypeExpr::domain("Widget", 3))]),
            )
            .with_warning(WarningTemplate::new("{role} is changing {service}", true)),
        );
        services.insert(
            "numpy.add".to_string(),
            ServiceConfig::new("add", Signature::default()).from_lib(),
        );
        let mut libs = BTreeMap::new();
        libs.insert(
            "numpy.add".to_string(),
            LibConfig::new("add", Signature::new(vec![Param::var_positional("args", TypeExpr::Any)])),
        );
        Fixed {
            services,
            libs,
            code: vec![UserCode {
                id: Uid::new(),
                func_name: "train".into(),
                signature: Signature::new(vec![Param::keyword("epochs", TypeExpr::int())]),
            }],
        }
    }

    fn service(protocol: ProtocolVersion) -> ServiceInfo {
        ServiceInfo {
            id: Uid::new(),
            name: "test-service".into(),
            protocol,
            enable_warnings: true,
        }
    }

    fn engine() -> ProtocolMigrationEngine {
        let registry = TypeRegistry::builder()
            .register(TypeDescriptor::new("Widget", 2).field("b", TypeExpr::int()))
            .register_migration(
                TypeDescriptor::new("Widget", 3).field("a", TypeExpr::int()),
                vec![FieldOp::rename("a", "b")],
            )
            .build()
            .unwrap();
        ProtocolMigrationEngine::new(
            Arc::new(registry),
            DataProtocol::new()
                .with_protocol(2, [("Widget", 2)])
                .with_protocol(3, [("Widget", 2), ("Widget", 3)]),
        )
    }

    #[test]
    fn builds_all_three_kinds() {
        let caller = SigningKey::generate().verify_key();
        let cat = build_catalog(
            &authority(),
            &service(ProtocolVersion::Stable(3)),
            &caller,
            ProtocolVersion::Stable(3),
            &engine(),
        )
        .unwrap();

        assert_eq!(cat.role, Role::DataScientist);
        let update = cat.endpoint("widget.update").unwrap();
        assert_eq!(update.service_path, "widget.update");
        let warning = update.warning.as_ref().unwrap();
        assert_eq!(warning.message, "data_scientist is changing test-service");

        // The lib-mirrored service config is skipped; the lib config is kept.
        assert!(cat.endpoint("numpy.add").is_none());
        let add = cat.lib_endpoint("numpy.add").unwrap();
        assert_eq!(add.service_path, LIB_DISPATCH_PATH);
        assert_eq!(add.module_path, "numpy.add");

        let train = cat.endpoint("code.call_train").unwrap();
        assert_eq!(train.service_path, USER_CODE_PATH);
        assert_eq!(train.name, "train");
        assert!(user_code_id(train).is_some());
        assert!(user_code_id(update).is_none());
    }

    #[test]
    fn older_protocol_downgrades_signatures() {
        let caller = SigningKey::generate().verify_key();
        let cat = build_catalog(
            &authority(),
            &service(ProtocolVersion::Stable(3)),
            &caller,
            ProtocolVersion::Stable(2),
            &engine(),
        )
        .unwrap();
        let sig = &cat.endpoint("widget.update").unwrap().signature;
        assert_eq!(sig.params[0].ty, TypeExpr::domain("Widget", 2));
        assert_eq!(cat.protocol, ProtocolVersion::Stable(2));
    }

    #[test]
    fn reserved_keyword_is_fatal() {
        let mut auth = authority();
        auth.services.insert(
            "widget.get".into(),
            ServiceConfig::new(
                "get",
                Signature::new(vec![Param::keyword(RESERVED_KEYWORD, TypeExpr::bool())]),
            ),
        );
        let err = build_catalog(
            &auth,
            &service(ProtocolVersion::Dev),
            &SigningKey::generate().verify_key(),
            ProtocolVersion::Dev,
            &engine(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::ReservedKeywordConflict { ref path } if path == "widget.get"));
    }

    #[test]
    fn malformed_path_is_fatal() {
        let mut auth = authority();
        auth.services
            .insert("widget..get".into(), ServiceConfig::new("get", Signature::default()));
        let err = build_catalog(
            &auth,
            &service(ProtocolVersion::Dev),
            &SigningKey::generate().verify_key(),
            ProtocolVersion::Dev,
            &engine(),
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidPath(ref p) if p == "widget..get"));
    }

    #[test]
    fn received_catalog_with_reserved_keyword_rejected() {
        let mut cat = EndpointCatalog::new(Uid::new(), "s", ProtocolVersion::Dev, Role::Guest);
        cat.endpoints.insert(
            "widget.get".into(),
            EndpointDescriptor::new(
                "widget.get",
                Signature::new(vec![Param::positional(RESERVED_KEYWORD, TypeExpr::Any)]),
            ),
        );
        assert!(matches!(
            validate_catalog(&cat),
            Err(ApiError::ReservedKeywordConflict { .. })
        ));
    }
}
