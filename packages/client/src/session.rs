//! API sessions: one authenticated caller talking to one service.
//!
//! A session is created at login. It negotiates the protocol version,
//! receives the caller's [`EndpointCatalog`], and builds proxy trees from it
//! lazily on first access. Every call made through those trees is signed
//! with the caller's key and every reply is verified, against the service's
//! advertised key when pinning is on, before it is opened.
//!
//! When the service reports that the caller's view changed, the session
//! fetches a fresh catalog and swaps it in atomically. Functions obtained
//! from the old trees keep working until they are dropped.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use sigcall::{
    JcsCodec, ProtocolMigrationEngine, ProtocolVersion, SignedEnvelope, SigningKey, Uid,
    Value, VerifyKey,
};
use sigcall_api::{Action, Call, CallResult, EndpointCatalog, IdentityMetadata, Role};
use tracing::{debug, info, warn};

use crate::catalog::validate_catalog;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::pipeline::{CallArgs, DeclineAll, Dispatcher, FunctionKind, Prompter};
use crate::proxy::{build_proxy_tree, ProxyTree};
use crate::transport::{HttpTransport, Transport};

/// Invoked when a reply asks the client to refresh its view of the service.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// Who the service says it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub id: Uid,
    pub name: String,
    pub verify_key: VerifyKey,
}

impl ServiceIdentity {
    pub fn from_metadata(meta: &IdentityMetadata) -> Self {
        Self {
            id: meta.id,
            name: meta.name.clone(),
            verify_key: meta.verify_key,
        }
    }

    /// Ask the session's transport for the service's current identity.
    pub fn from_session(session: &ApiSession) -> Result<Self, ApiError> {
        let meta = session
            .inner
            .transport
            .fetch_service_identity(&session.caller())?;
        Ok(Self::from_metadata(&meta))
    }
}

#[derive(Default)]
struct Trees {
    api: Option<Arc<ProxyTree>>,
    lib: Option<Arc<ProxyTree>>,
}

struct SessionState {
    catalog: Arc<EndpointCatalog>,
    trees: Trees,
}

struct SessionInner {
    service: ServiceIdentity,
    signing_key: SigningKey,
    protocol: ProtocolVersion,
    transport: Arc<dyn Transport>,
    engine: Arc<ProtocolMigrationEngine>,
    prompter: Arc<dyn Prompter>,
    codec: JcsCodec,
    pinned_key: Option<VerifyKey>,
    state: RwLock<SessionState>,
    on_refresh: RwLock<Option<RefreshCallback>>,
    trace: Mutex<Option<Vec<Action>>>,
    weak_self: Weak<SessionInner>,
}

impl Dispatcher for SessionInner {
    fn service_id(&self) -> Uid {
        self.service.id
    }

    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    fn engine(&self) -> &ProtocolMigrationEngine {
        &self.engine
    }

    fn prompter(&self) -> &dyn Prompter {
        self.prompter.as_ref()
    }

    fn dispatch(&self, call: Call) -> Result<CallResult, ApiError> {
        let envelope = SignedEnvelope::sign(&call, &self.signing_key, &self.codec)?;
        let reply = self.transport.send_signed(&envelope)?;
        if let Some(pinned) = &self.pinned_key {
            if reply.signer() != pinned {
                warn!(
                    path = %call.path,
                    signer = %reply.signer(),
                    expected = %pinned,
                    "reply not signed by the service key"
                );
                return Err(ApiError::InvalidSignature);
            }
        }
        let result = reply.open(&self.codec).map_err(|e| {
            warn!(path = %call.path, error = %e, "reply rejected");
            ApiError::from(e)
        })?;
        debug!(path = %call.path, "reply verified");
        Ok(result.clone())
    }

    fn record_action(&self, action: &Action) {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(actions) = trace.as_mut() {
            actions.push(action.clone());
        }
    }

    fn request_refresh(&self) {
        let callback = self
            .on_refresh
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(cb) => cb(),
            None => debug!(service = %self.service.name, "refresh requested but no callback set"),
        }
    }
}

impl SessionInner {
    fn catalog(&self) -> Arc<EndpointCatalog> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner).catalog)
    }

    fn weak_dispatcher(&self) -> Weak<dyn Dispatcher> {
        self.weak_self.clone()
    }
}

/// A logged-in session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ApiSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSession")
            .field("service", &self.inner.service.name)
            .field("caller", &self.caller())
            .field("protocol", &self.inner.protocol)
            .finish_non_exhaustive()
    }
}

impl ApiSession {
    pub fn service(&self) -> &ServiceIdentity {
        &self.inner.service
    }

    pub fn service_id(&self) -> Uid {
        self.inner.service.id
    }

    pub fn caller(&self) -> VerifyKey {
        self.inner.signing_key.verify_key()
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.inner.protocol
    }

    pub fn role(&self) -> Role {
        self.inner.catalog().role
    }

    /// Snapshot of the current catalog.
    pub fn catalog(&self) -> Arc<EndpointCatalog> {
        self.inner.catalog()
    }

    /// Whether two handles refer to the same session.
    pub fn same_session(&self, other: &ApiSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The proxy tree of service endpoints, built on first access.
    pub fn api(&self) -> Result<Arc<ProxyTree>, ApiError> {
        self.tree(false)
    }

    /// The proxy tree of library functions, built on first access.
    pub fn lib(&self) -> Result<Arc<ProxyTree>, ApiError> {
        self.tree(true)
    }

    fn tree(&self, lib: bool) -> Result<Arc<ProxyTree>, ApiError> {
        let pick = |trees: &Trees| if lib { trees.lib.clone() } else { trees.api.clone() };
        {
            let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(tree) = pick(&state.trees) {
                return Ok(tree);
            }
        }

        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(tree) = pick(&state.trees) {
            return Ok(tree);
        }
        let tree = Arc::new(build_tree(&state.catalog, lib, &self.inner.weak_dispatcher()));
        if lib {
            state.trees.lib = Some(Arc::clone(&tree));
        } else {
            state.trees.api = Some(Arc::clone(&tree));
        }
        Ok(tree)
    }

    /// Resolve `path` in the service tree and call it.
    pub fn call(&self, path: &str, args: CallArgs) -> Result<Option<Value>, ApiError> {
        let tree = self.api()?;
        let function = tree
            .resolve(path)?
            .as_function()
            .cloned()
            .ok_or_else(|| ApiError::WrongMemberKind {
                path: path.to_string(),
                expected: "callable",
            })?;
        function.call(args)
    }

    /// Whether the service tree has a top-level member called `name`.
    pub fn has_service(&self, name: &str) -> bool {
        self.api().is_ok_and(|tree| tree.contains(name))
    }

    /// Whether the library tree has a top-level member called `name`.
    pub fn has_lib(&self, name: &str) -> bool {
        self.lib().is_ok_and(|tree| tree.contains(name))
    }

    /// Fetch a fresh catalog from the service and swap it in.
    pub fn refresh_catalog(&self) -> Result<(), ApiError> {
        let catalog = self
            .inner
            .transport
            .fetch_catalog(&self.caller(), self.inner.protocol)?;
        self.replace_catalog(catalog)
    }

    /// Swap in `catalog`. Cached trees are dropped and rebuilt on next access.
    pub fn replace_catalog(&self, catalog: EndpointCatalog) -> Result<(), ApiError> {
        check_catalog(&catalog, &self.inner.service)?;
        let endpoints = catalog.len();
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = SessionState {
            catalog: Arc::new(catalog),
            trees: Trees::default(),
        };
        info!(service = %self.inner.service.name, endpoints, "catalog refreshed");
        Ok(())
    }

    /// Run `callback` whenever a reply asks for a refresh.
    pub fn on_refresh(&self, callback: RefreshCallback) {
        *self
            .inner
            .on_refresh
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Refresh the catalog from the service whenever a reply asks for it.
    pub fn enable_auto_refresh(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.on_refresh(Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(e) = (ApiSession { inner }).refresh_catalog() {
                warn!(error = %e, "catalog refresh failed");
            }
        }));
    }

    /// Start recording library actions. Replaces any active trace.
    pub fn begin_trace(&self) {
        *self.inner.trace.lock().unwrap_or_else(PoisonError::into_inner) = Some(Vec::new());
    }

    /// Stop recording and return the actions recorded since [`begin_trace`](Self::begin_trace).
    pub fn end_trace(&self) -> Vec<Action> {
        self.inner
            .trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default()
    }
}

fn build_tree(
    catalog: &EndpointCatalog,
    lib: bool,
    session: &Weak<dyn Dispatcher>,
) -> ProxyTree {
    if lib {
        build_proxy_tree(
            catalog.lib_endpoints.values().map(|d| (&**d, FunctionKind::Lib)),
            session,
        )
    } else {
        build_proxy_tree(
            catalog.endpoints.values().map(|d| (d, FunctionKind::Service)),
            session,
        )
    }
}

/// Service and library trees for a catalog with no session behind them.
///
/// Useful for inspecting a saved catalog. Every call made through these
/// trees fails with [`ApiError::TransportUnavailable`].
pub fn detached_trees(catalog: &EndpointCatalog) -> Result<(ProxyTree, ProxyTree), ApiError> {
    validate_catalog(catalog)?;
    let nobody: Weak<dyn Dispatcher> = Weak::<SessionInner>::new();
    Ok((
        build_tree(catalog, false, &nobody),
        build_tree(catalog, true, &nobody),
    ))
}

fn check_catalog(catalog: &EndpointCatalog, service: &ServiceIdentity) -> Result<(), ApiError> {
    if catalog.service_id != service.id {
        return Err(ApiError::IdentityMismatch {
            expected: service.id.to_string(),
            actual: catalog.service_id.to_string(),
        });
    }
    validate_catalog(catalog)
}

/// Logs in to a service and produces an [`ApiSession`].
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    signing_key: SigningKey,
    engine: Arc<ProtocolMigrationEngine>,
    prompter: Arc<dyn Prompter>,
    max_protocol: ProtocolVersion,
    pin_service_key: bool,
}

impl SessionBuilder {
    pub fn new(transport: Arc<dyn Transport>, signing_key: SigningKey) -> Self {
        Self {
            transport,
            signing_key,
            engine: Arc::new(ProtocolMigrationEngine::default()),
            prompter: Arc::new(DeclineAll),
            max_protocol: ProtocolVersion::Dev,
            pin_service_key: true,
        }
    }

    /// An HTTP session configured from `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), config.signing_key.clone())
            .max_protocol(config.protocol)
            .pin_service_key(config.pin_service_key))
    }

    pub fn engine(mut self, engine: Arc<ProtocolMigrationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Newest protocol version to offer during negotiation.
    pub fn max_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.max_protocol = protocol;
        self
    }

    pub fn pin_service_key(mut self, pin: bool) -> Self {
        self.pin_service_key = pin;
        self
    }

    /// Protocol versions this client offers, ascending.
    pub fn offered_protocols(&self) -> Vec<ProtocolVersion> {
        self.engine
            .data_protocol()
            .supported()
            .into_iter()
            .filter(|p| *p <= self.max_protocol)
            .collect()
    }

    /// Fetch the service identity, negotiate a protocol, fetch the catalog,
    /// and build the session.
    ///
    /// # Errors
    ///
    /// [`ApiError::NoCommonProtocol`] if negotiation fails, and any catalog
    /// problem [`validate_catalog`] reports, including
    /// [`ApiError::ReservedKeywordConflict`].
    pub fn login(self) -> Result<ApiSession, ApiError> {
        let caller = self.signing_key.verify_key();
        let meta = self.transport.fetch_service_identity(&caller)?;
        let protocol = meta
            .negotiate(&self.offered_protocols())
            .ok_or(ApiError::NoCommonProtocol)?;
        let catalog = self.transport.fetch_catalog(&caller, protocol)?;
        self.build(&meta, protocol, catalog)
    }

    /// Build a session from an identity and catalog obtained elsewhere.
    pub fn build(
        self,
        meta: &IdentityMetadata,
        protocol: ProtocolVersion,
        catalog: EndpointCatalog,
    ) -> Result<ApiSession, ApiError> {
        let service = ServiceIdentity::from_metadata(meta);
        check_catalog(&catalog, &service)?;
        let pinned_key = self.pin_service_key.then_some(meta.verify_key);

        info!(
            service = %service.name,
            caller = %self.signing_key.verify_key(),
            %protocol,
            role = %catalog.role,
            endpoints = catalog.endpoints.len(),
            lib_endpoints = catalog.lib_endpoints.len(),
            "session established"
        );

        let inner = Arc::new_cyclic(|weak_self| SessionInner {
            service,
            signing_key: self.signing_key,
            protocol,
            transport: self.transport,
            engine: self.engine,
            prompter: self.prompter,
            codec: JcsCodec,
            pinned_key,
            state: RwLock::new(SessionState {
                catalog: Arc::new(catalog),
                trees: Trees::default(),
            }),
            on_refresh: RwLock::new(None),
            trace: Mutex::new(None),
            weak_self: weak_self.clone(),
        });
        Ok(ApiSession { inner })
    }
}
