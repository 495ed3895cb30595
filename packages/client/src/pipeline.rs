//! The per-call invocation pipeline.
//!
//! Every call on a [`RemoteFunction`] goes through the same steps:
//!
//! 1. split off the reserved `blocking` keyword
//! 2. validate arguments against the endpoint signature (nothing is sent on failure)
//! 3. migrate arguments to the negotiated protocol
//! 4. for library and user-code calls, replace remote objects with pointers
//! 5. merge pre-bound keywords and attach the protocol version
//! 6. show the endpoint warning and, if required, ask for confirmation
//! 7. append library actions to the active trace
//! 8. sign, send, verify and open the reply (the [`Dispatcher`])
//! 9. migrate the returned value back to the latest local representation
//!
//! A declined confirmation returns `Ok(None)`: no call, no error.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use sigcall::{
    render_signature, validate_call_args, Direction, ProtocolMigrationEngine, ProtocolVersion,
    Signature, Uid, ValidationError, Value, RESERVED_KEYWORD,
};
use sigcall_api::{Action, Call, CallResult, EndpointDescriptor, JOBS_BY_USER_CODE_PATH};
use tracing::{debug, warn};

use crate::catalog::{user_code_id, LIB_DISPATCH_PATH};
use crate::error::ApiError;

/// What the pipeline needs from the session that owns a function.
pub trait Dispatcher: Send + Sync {
    fn service_id(&self) -> Uid;

    fn protocol(&self) -> ProtocolVersion;

    fn engine(&self) -> &ProtocolMigrationEngine;

    fn prompter(&self) -> &dyn Prompter;

    /// Sign `call`, send it, verify and open the reply.
    fn dispatch(&self, call: Call) -> Result<CallResult, ApiError>;

    /// Append to the active trace, if one is active.
    fn record_action(&self, action: &Action);

    /// The service asked the client to refresh its catalog.
    fn request_refresh(&self);
}

/// Interactive confirmation for endpoints whose warning requires it.
pub trait Prompter: Send + Sync {
    fn confirm(&self, path: &str, message: &str) -> bool;
}

/// Declines every confirmation. The default, so nothing that asks for
/// confirmation runs unattended.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

impl Prompter for DeclineAll {
    fn confirm(&self, _path: &str, _message: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl Prompter for ApproveAll {
    fn confirm(&self, _path: &str, _message: &str) -> bool {
        true
    }
}

/// How a function's calls are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Dispatched to the descriptor's own service path.
    Service,
    /// Wrapped in an [`Action`] and dispatched to [`LIB_DISPATCH_PATH`].
    Lib,
    /// A user-code function dispatched to `code.call` with its id pre-bound.
    UserCode(Uid),
}

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Pass the reserved `blocking` keyword.
    pub fn blocking(self, blocking: bool) -> Self {
        self.kwarg(RESERVED_KEYWORD, blocking)
    }
}

/// A callable leaf of a proxy tree.
pub struct RemoteFunction {
    path: String,
    descriptor: EndpointDescriptor,
    kind: FunctionKind,
    session: Weak<dyn Dispatcher>,
}

impl std::fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("path", &self.path)
            .field("service_path", &self.descriptor.service_path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl RemoteFunction {
    /// Wrap `descriptor` as the function reachable at `path`.
    ///
    /// The caller-facing signature drops a leading `self` (unless the
    /// endpoint binds a receiver) and any `context` parameter.
    pub fn new(
        path: impl Into<String>,
        mut descriptor: EndpointDescriptor,
        kind: FunctionKind,
        session: Weak<dyn Dispatcher>,
    ) -> Self {
        descriptor.signature = descriptor.signature.without_receiver(descriptor.has_self);
        let kind = match (kind, user_code_id(&descriptor)) {
            (FunctionKind::Service, Some(id)) => FunctionKind::UserCode(id),
            (kind, _) => kind,
        };
        Self {
            path: path.into(),
            descriptor,
            kind,
            session,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.descriptor.signature
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    pub fn doc(&self) -> Option<&str> {
        self.descriptor.doc_string.as_deref()
    }

    /// Human-readable signature, e.g. `widget.get(id: UID) -> Widget`.
    pub fn describe(&self) -> String {
        render_signature(&self.path, &self.descriptor.signature)
    }

    pub fn user_code_id(&self) -> Option<Uid> {
        match self.kind {
            FunctionKind::UserCode(id) => Some(id),
            _ => None,
        }
    }

    fn session(&self) -> Result<Arc<dyn Dispatcher>, ApiError> {
        self.session.upgrade().ok_or(ApiError::TransportUnavailable)
    }

    /// Run the pipeline. `Ok(None)` means the caller declined the warning.
    pub fn call(&self, args: CallArgs) -> Result<Option<Value>, ApiError> {
        let session = self.session()?;
        let CallArgs { args, mut kwargs } = args;

        let blocking = match kwargs.remove(RESERVED_KEYWORD) {
            None => true,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(ValidationError::TypeMismatch {
                    param: RESERVED_KEYWORD.to_string(),
                    expected: "bool".to_string(),
                    actual: other.type_name(),
                }
                .into())
            }
        };

        let checked = validate_call_args(args, kwargs, &self.descriptor.signature)?;

        let protocol = session.protocol();
        let engine = session.engine();
        let (mut args, mut kwargs) =
            engine.migrate_args(checked.args, checked.kwargs, Direction::Downgrade, protocol)?;

        if self.kind != FunctionKind::Service {
            args = args.into_iter().map(to_pointer).collect();
            kwargs = kwargs.into_iter().map(|(k, v)| (k, to_pointer(v))).collect();
        }

        for (name, value) in &self.descriptor.prebound {
            kwargs.insert(name.clone(), value.clone());
        }

        let (call, action) = match self.kind {
            FunctionKind::Lib => {
                let action = Action::function(&self.descriptor.module_path, args, kwargs);
                let call = Call::new(session.service_id(), LIB_DISPATCH_PATH)
                    .with_args(vec![action.to_value()]);
                (call, Some(action))
            }
            FunctionKind::Service | FunctionKind::UserCode(_) => {
                let call = Call::new(session.service_id(), &self.descriptor.service_path)
                    .with_args(args)
                    .with_kwargs(kwargs);
                (call, None)
            }
        };
        let call = call.with_blocking(blocking).with_protocol(protocol);

        if !self.confirm(session.prompter()) {
            return Ok(None);
        }

        if let Some(action) = &action {
            session.record_action(action);
        }

        debug!(path = %self.path, dispatch = %call.path, blocking, "dispatching call");
        let result = session.dispatch(call)?;
        self.finish(session.as_ref(), result).map(Some)
    }

    /// Jobs started from this user-code function.
    pub fn jobs(&self) -> Result<Value, ApiError> {
        let id = self.user_code_id().ok_or_else(|| ApiError::NotUserCode {
            path: self.path.clone(),
        })?;
        let session = self.session()?;
        let mut kwargs = BTreeMap::new();
        kwargs.insert("user_code_id".to_string(), Value::Uid(id));
        let call = Call::new(session.service_id(), JOBS_BY_USER_CODE_PATH)
            .with_kwargs(kwargs)
            .with_protocol(session.protocol());
        let result = session.dispatch(call)?;
        self.finish(session.as_ref(), result)
    }

    /// Show the warning, if any. `false` when the caller declines.
    fn confirm(&self, prompter: &dyn Prompter) -> bool {
        let Some(warning) = self.descriptor.warning.as_ref().filter(|w| w.enabled) else {
            return true;
        };
        if !warning.confirmation {
            warn!(path = %self.path, "{}", warning.message);
            return true;
        }
        if prompter.confirm(&self.path, &warning.message) {
            true
        } else {
            warn!(path = %self.path, "call declined");
            false
        }
    }

    fn finish(&self, session: &dyn Dispatcher, result: CallResult) -> Result<Value, ApiError> {
        let update = result.requires_api_update();
        let value = result.into_result().map_err(ApiError::Remote)?;
        let value = session
            .engine()
            .migrate_value(value, Direction::Upgrade, session.protocol())?;
        if update {
            session.request_refresh();
        }
        Ok(value)
    }
}

/// Remote objects travel as pointers on library and user-code calls.
fn to_pointer(value: Value) -> Value {
    match value {
        Value::Remote(remote) => Value::Pointer(remote.id),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sigcall::{Param, RemoteObject, TypeExpr};
    use sigcall_api::{EndpointWarning, ErrorDescriptor};

    use super::*;

    /// Records calls and answers with a fixed result.
    struct Recorder {
        service_id: Uid,
        engine: ProtocolMigrationEngine,
        prompter: Box<dyn Prompter>,
        reply: CallResult,
        calls: Mutex<Vec<Call>>,
        actions: Mutex<Vec<Action>>,
        refreshes: Mutex<usize>,
    }

    impl Recorder {
        fn new(reply: CallResult, prompter: Box<dyn Prompter>) -> Arc<Self> {
            Arc::new(Self {
                service_id: Uid::new(),
                engine: ProtocolMigrationEngine::default(),
                prompter,
                reply,
                calls: Mutex::new(Vec::new()),
                actions: Mutex::new(Vec::new()),
                refreshes: Mutex::new(0),
            })
        }
    }

    impl Dispatcher for Recorder {
        fn service_id(&self) -> Uid {
            self.service_id
        }
        fn protocol(&self) -> ProtocolVersion {
            ProtocolVersion::Dev
        }
        fn engine(&self) -> &ProtocolMigrationEngine {
            &self.engine
        }
        fn prompter(&self) -> &dyn Prompter {
            self.prompter.as_ref()
        }
        fn dispatch(&self, call: Call) -> Result<CallResult, ApiError> {
            self.calls.lock().unwrap().push(call);
            Ok(self.reply.clone())
        }
        fn record_action(&self, action: &Action) {
            self.actions.lock().unwrap().push(action.clone());
        }
        fn request_refresh(&self) {
            *self.refreshes.lock().unwrap() += 1;
        }
    }

    fn function(
        rec: &Arc<Recorder>,
        descriptor: EndpointDescriptor,
        kind: FunctionKind,
    ) -> RemoteFunction {
        let dispatcher: Arc<dyn Dispatcher> = rec.clone();
        RemoteFunction::new("svc.f", descriptor, kind, Arc::downgrade(&dispatcher))
    }

    fn f_of_x_int() -> EndpointDescriptor {
        EndpointDescriptor::new(
            "svc.f",
            Signature::new(vec![Param::positional("x", TypeExpr::int())]),
        )
    }

    #[test]
    fn type_mismatch_is_not_dispatched() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        let err = f.call(CallArgs::new().kwarg("x", "a")).unwrap_err();
        match err {
            ApiError::Validation(ValidationError::TypeMismatch { param, expected, actual }) => {
                assert_eq!((param.as_str(), expected.as_str(), actual.as_str()), ("x", "int", "str"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(rec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn valid_call_carries_protocol_and_blocking() {
        let rec = Recorder::new(CallResult::ok(7), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        let out = f.call(CallArgs::new().arg(3).blocking(false)).unwrap();
        assert_eq!(out, Some(Value::Int(7)));

        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "svc.f");
        assert_eq!(calls[0].args, vec![Value::Int(3)]);
        assert!(!calls[0].blocking);
        assert_eq!(calls[0].protocol(), Some(ProtocolVersion::Dev));
        assert!(!calls[0].kwargs.contains_key(RESERVED_KEYWORD));
    }

    #[test]
    fn non_bool_blocking_rejected() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        let err = f.call(CallArgs::new().arg(1).kwarg(RESERVED_KEYWORD, 1)).unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::TypeMismatch { .. })));
    }

    #[test]
    fn prebound_values_are_merged() {
        let rec = Recorder::new(CallResult::ok(Value::None), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int().with_prebound("limit", 10), FunctionKind::Service);
        f.call(CallArgs::new().arg(1)).unwrap();
        assert_eq!(rec.calls.lock().unwrap()[0].kwargs["limit"], Value::Int(10));
    }

    #[test]
    fn declined_warning_is_a_silent_no_op() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(DeclineAll));
        let d = f_of_x_int().with_warning(EndpointWarning::new("sure?", true));
        let f = function(&rec, d, FunctionKind::Service);
        assert_eq!(f.call(CallArgs::new().arg(1)).unwrap(), None);
        assert!(rec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn disabled_or_informational_warnings_do_not_block() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(DeclineAll));
        let mut disabled = EndpointWarning::new("sure?", true);
        disabled.enabled = false;
        let f = function(&rec, f_of_x_int().with_warning(disabled), FunctionKind::Service);
        assert!(f.call(CallArgs::new().arg(1)).unwrap().is_some());

        let info = EndpointWarning::new("heads up", false);
        let f = function(&rec, f_of_x_int().with_warning(info), FunctionKind::Service);
        assert!(f.call(CallArgs::new().arg(1)).unwrap().is_some());
        assert_eq!(rec.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn approved_warning_dispatches() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(ApproveAll));
        let d = f_of_x_int().with_warning(EndpointWarning::new("sure?", true));
        let f = function(&rec, d, FunctionKind::Service);
        assert_eq!(f.call(CallArgs::new().arg(1)).unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn lib_call_routes_action_and_traces_once() {
        let rec = Recorder::new(CallResult::ok(Value::None), Box::new(DeclineAll));
        let d = EndpointDescriptor::new(
            LIB_DISPATCH_PATH,
            Signature::new(vec![Param::var_positional("args", TypeExpr::Any)]),
        )
        .with_module_path("numpy.add");
        let f = function(&rec, d, FunctionKind::Lib);
        let remote = RemoteObject {
            id: Uid::new(),
            service_id: rec.service_id,
            type_name: "ndarray".into(),
        };
        f.call(CallArgs::new().arg(remote.clone()).arg(2)).unwrap();

        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls[0].path, LIB_DISPATCH_PATH);
        let action = Action::from_value(&calls[0].args[0]).unwrap();
        assert_eq!(action.full_path(), "numpy.add");
        assert_eq!(action.args, vec![Value::Pointer(remote.id), Value::Int(2)]);

        let actions = rec.actions.lock().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0], action);
    }

    #[test]
    fn remote_error_is_a_value() {
        let rec = Recorder::new(
            CallResult::err(ErrorDescriptor::new("not_found", "no widget")),
            Box::new(DeclineAll),
        );
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        let err = f.call(CallArgs::new().arg(1)).unwrap_err();
        assert!(matches!(err, ApiError::Remote(ref d) if d.message == "no widget"));
    }

    #[test]
    fn update_flag_requests_refresh() {
        let rec = Recorder::new(CallResult::ok_with_update(true), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        f.call(CallArgs::new().arg(1)).unwrap();
        assert_eq!(*rec.refreshes.lock().unwrap(), 1);
    }

    #[test]
    fn receiver_and_context_are_hidden() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(DeclineAll));
        let d = EndpointDescriptor::new(
            "svc.f",
            Signature::new(vec![
                Param::positional("self", TypeExpr::Any),
                Param::positional("context", TypeExpr::Any),
                Param::positional("x", TypeExpr::int()),
            ]),
        );
        let f = function(&rec, d, FunctionKind::Service);
        assert_eq!(f.signature().param_names(), vec!["x".to_string()]);
        assert_eq!(f.describe(), "svc.f(x: int)");
    }

    #[test]
    fn dropped_session_is_unavailable() {
        let rec = Recorder::new(CallResult::ok(1), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        drop(rec);
        assert!(matches!(
            f.call(CallArgs::new().arg(1)),
            Err(ApiError::TransportUnavailable)
        ));
    }

    #[test]
    fn jobs_only_for_user_code() {
        let rec = Recorder::new(CallResult::ok(Value::List(vec![])), Box::new(DeclineAll));
        let f = function(&rec, f_of_x_int(), FunctionKind::Service);
        assert!(matches!(f.jobs(), Err(ApiError::NotUserCode { .. })));

        let id = Uid::new();
        let d = EndpointDescriptor::new("code.call", Signature::default())
            .with_name("train")
            .with_prebound("uid", id);
        let f = function(&rec, d, FunctionKind::Service);
        assert_eq!(f.user_code_id(), Some(id));
        assert_eq!(f.jobs().unwrap(), Value::List(vec![]));
        let calls = rec.calls.lock().unwrap();
        assert_eq!(calls[0].path, JOBS_BY_USER_CODE_PATH);
        assert_eq!(calls[0].kwargs["user_code_id"], Value::Uid(id));
    }
}
