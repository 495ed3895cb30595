//! Shared helpers for the sigcall conformance test suite.
//!
//! [`MockService`] is an in-process service behind the [`Transport`] seam.
//! It signs its identity and replies with its own key, builds catalogs
//! with the real [`build_catalog`] from a [`FixtureAuthority`], and
//! records every call it receives so tests can assert on exactly what went
//! over the wire. Reply handlers are registered per dispatch path.
//!
//! The widget fixtures describe one versioned type:
//!
//! | Protocol | Widget versions | Fields |
//! |----------|-----------------|--------|
//! | 2 | v2 | `b: int` |
//! | 3 | v2, v3 | v3 renames `b` to `a` |
//! | dev | v2, v3 | |

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use sigcall::{
    Codec, DataProtocol, FieldOp, JcsCodec, ObjectValue, ProtocolMigrationEngine, ProtocolVersion,
    SignedEnvelope, SigningKey, TypeDescriptor, TypeExpr, TypeRegistry, Uid, Value, VerifyKey,
};
use sigcall_api::error::codes;
use sigcall_api::{
    Call, CallResult, EndpointCatalog, ErrorDescriptor, IdentityMetadata, Role, SignedCall,
    SignedResult,
};
use sigcall_client::{
    build_catalog, ApiError, Authority, AuthorityError, LibConfig, ServiceConfig, ServiceInfo,
    SessionBuilder, Transport, TransportError, UserCode,
};

/// Computes the reply to one call.
pub type Handler = Arc<dyn Fn(&Call) -> CallResult + Send + Sync>;

/// How the service signs its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Honest,
    /// Signed correctly, then the payload is swapped.
    Tampered,
    /// Signed with a key that is not the service's.
    Impersonated,
}

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

/// In-memory [`Authority`]: roles per caller, endpoints gated by a minimum role.
#[derive(Default)]
pub struct FixtureAuthority {
    roles: RwLock<HashMap<VerifyKey, Role>>,
    services: RwLock<BTreeMap<String, (Role, ServiceConfig)>>,
    libs: RwLock<BTreeMap<String, LibConfig>>,
    user_code: RwLock<HashMap<VerifyKey, Vec<UserCode>>>,
}

impl FixtureAuthority {
    pub fn grant(&self, caller: &VerifyKey, role: Role) {
        write(&self.roles).insert(*caller, role);
    }

    /// Expose `config` at `path` to callers holding at least `min_role`.
    pub fn add_service(&self, path: &str, min_role: Role, config: ServiceConfig) {
        write(&self.services).insert(path.to_string(), (min_role, config));
    }

    pub fn add_lib(&self, path: &str, config: LibConfig) {
        write(&self.libs).insert(path.to_string(), config);
    }

    pub fn add_user_code(&self, owner: &VerifyKey, code: UserCode) {
        write(&self.user_code).entry(*owner).or_default().push(code);
    }
}

impl Authority for FixtureAuthority {
    fn role_for(&self, caller: &VerifyKey) -> Result<Role, AuthorityError> {
        read(&self.roles)
            .get(caller)
            .copied()
            .ok_or_else(|| AuthorityError::UnknownCaller(caller.to_string()))
    }

    fn service_configs(&self, role: Role) -> Result<BTreeMap<String, ServiceConfig>, AuthorityError> {
        Ok(read(&self.services)
            .iter()
            .filter(|(_, (min, _))| role >= *min)
            .map(|(path, (_, config))| (path.clone(), config.clone()))
            .collect())
    }

    fn lib_configs(&self, _caller: &VerifyKey) -> Result<BTreeMap<String, LibConfig>, AuthorityError> {
        Ok(read(&self.libs).clone())
    }

    fn user_code(&self, caller: &VerifyKey) -> Result<Vec<UserCode>, AuthorityError> {
        Ok(read(&self.user_code).get(caller).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// An in-process service reachable through [`Transport`].
pub struct MockService {
    key: SigningKey,
    info: ServiceInfo,
    supported: Vec<ProtocolVersion>,
    authority: Arc<FixtureAuthority>,
    engine: Arc<ProtocolMigrationEngine>,
    handlers: RwLock<HashMap<String, Handler>>,
    calls: Mutex<Vec<(VerifyKey, Call)>>,
    reply_mode: Mutex<ReplyMode>,
    online: AtomicBool,
    catalog_fetches: AtomicUsize,
}

impl MockService {
    /// A service named `name` at the dev protocol, speaking protocols 2, 3 and dev.
    pub fn new(name: &str) -> Arc<Self> {
        let engine = Arc::new(widget_engine());
        Arc::new(Self {
            key: SigningKey::generate(),
            info: ServiceInfo {
                id: Uid::new(),
                name: name.to_string(),
                protocol: ProtocolVersion::Dev,
                enable_warnings: true,
            },
            supported: engine.data_protocol().supported(),
            authority: Arc::new(FixtureAuthority::default()),
            engine,
            handlers: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            reply_mode: Mutex::new(ReplyMode::Honest),
            online: AtomicBool::new(true),
            catalog_fetches: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> Uid {
        self.info.id
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    pub fn verify_key(&self) -> VerifyKey {
        self.key.verify_key()
    }

    pub fn authority(&self) -> &FixtureAuthority {
        &self.authority
    }

    pub fn engine(&self) -> Arc<ProtocolMigrationEngine> {
        Arc::clone(&self.engine)
    }

    /// Answer calls dispatched to `path` with `handler`.
    pub fn on(&self, path: &str, handler: impl Fn(&Call) -> CallResult + Send + Sync + 'static) {
        write(&self.handlers).insert(path.to_string(), Arc::new(handler));
    }

    /// Answer calls to `path` with their first positional argument.
    pub fn echo(&self, path: &str) {
        self.on(path, |call| {
            CallResult::ok(call.args.first().cloned().unwrap_or_default())
        });
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        *self.reply_mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Every call received so far, with the key that signed it.
    pub fn calls(&self) -> Vec<(VerifyKey, Call)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_call(&self) -> Option<Call> {
        self.calls().pop().map(|(_, call)| call)
    }

    pub fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::SeqCst)
    }

    /// A login builder for `caller` using the widget engine.
    pub fn session_builder(self: &Arc<Self>, caller: &SigningKey) -> SessionBuilder {
        SessionBuilder::new(Arc::clone(self) as Arc<dyn Transport>, caller.clone())
            .engine(Arc::new(widget_engine()))
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable("connection refused".into()))
        }
    }

    fn reply(&self, call: &Call) -> CallResult {
        let handler = read(&self.handlers).get(&call.path).cloned();
        match handler {
            Some(h) => h(call),
            None => CallResult::err(ErrorDescriptor::new(
                codes::UNKNOWN_ENDPOINT,
                format!("no handler for `{}`", call.path),
            )),
        }
    }

    fn sign(&self, result: &CallResult) -> Result<SignedResult, TransportError> {
        let mode = *self.reply_mode.lock().unwrap_or_else(PoisonError::into_inner);
        let encode_err = |e: sigcall::EnvelopeError| TransportError::Decode(e.to_string());
        match mode {
            ReplyMode::Honest => SignedEnvelope::sign(result, &self.key, &JcsCodec).map_err(encode_err),
            ReplyMode::Impersonated => {
                SignedEnvelope::sign(result, &SigningKey::generate(), &JcsCodec).map_err(encode_err)
            }
            ReplyMode::Tampered => {
                let honest = SignedEnvelope::sign(result, &self.key, &JcsCodec).map_err(encode_err)?;
                let (signer, signature, _) = honest.into_parts();
                let forged = JcsCodec
                    .encode(&CallResult::ok(Value::Str("forged".into())))
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(SignedEnvelope::from_parts(signer, signature, forged))
            }
        }
    }
}

impl Transport for MockService {
    fn send_signed(&self, envelope: &SignedCall) -> Result<SignedResult, TransportError> {
        self.check_online()?;
        let result = match envelope.open(&JcsCodec) {
            Ok(call) => {
                self.calls
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((*envelope.signer(), call.clone()));
                self.reply(call)
            }
            Err(e) => CallResult::err(ErrorDescriptor::new(codes::INVALID_SIGNATURE, e.to_string())),
        };
        self.sign(&result)
    }

    fn fetch_service_identity(&self, _caller: &VerifyKey) -> Result<IdentityMetadata, TransportError> {
        self.check_online()?;
        Ok(IdentityMetadata {
            id: self.info.id,
            name: self.info.name.clone(),
            verify_key: self.key.verify_key(),
            protocol_version: self.info.protocol,
            supported_protocols: self.supported.clone(),
        })
    }

    fn fetch_catalog(
        &self,
        caller: &VerifyKey,
        protocol: ProtocolVersion,
    ) -> Result<EndpointCatalog, TransportError> {
        self.check_online()?;
        self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
        build_catalog(self.authority.as_ref(), &self.info, caller, protocol, &self.engine).map_err(
            |e: ApiError| TransportError::Status {
                status: 403,
                body: e.to_string(),
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Widget fixtures
// ---------------------------------------------------------------------------

/// Widget v2 has `b`; v3 renamed it to `a`.
pub fn widget_registry() -> TypeRegistry {
    TypeRegistry::builder()
        .register(TypeDescriptor::new("Widget", 2).field("b", TypeExpr::int()))
        .register_migration(
            TypeDescriptor::new("Widget", 3).field("a", TypeExpr::int()),
            vec![FieldOp::rename("a", "b")],
        )
        .build()
        .unwrap_or_default()
}

pub fn widget_engine() -> ProtocolMigrationEngine {
    let protocol = DataProtocol::new()
        .with_protocol(2, [("Widget", 2)])
        .with_protocol(3, [("Widget", 2), ("Widget", 3)]);
    ProtocolMigrationEngine::new(Arc::new(widget_registry()), protocol)
}

pub fn widget_v2(b: i64) -> Value {
    ObjectValue::new("Widget", 2).with_field("b", b).into()
}

pub fn widget_v3(a: i64) -> Value {
    ObjectValue::new("Widget", 3).with_field("a", a).into()
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
