//! Client side of the sigcall remote-invocation layer.
//!
//! A caller logs in with [`SessionBuilder`], receives the [`EndpointCatalog`]
//! of operations it may see, and calls them through a [`ProxyTree`] as if
//! they were local functions. Arguments are checked against each endpoint's
//! signature before anything is sent, calls are signed with the caller's
//! key, and replies are verified before they are opened.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | [`ClientConfig`] from `SIGCALL_*` environment variables |
//! | [`authority`] | The [`Authority`] seam: roles, configs and warnings per caller |
//! | [`catalog`] | [`build_catalog`] and [`validate_catalog`] |
//! | [`transport`] | The [`Transport`] seam and [`HttpTransport`] |
//! | [`pipeline`] | [`RemoteFunction`] and the per-call invocation steps |
//! | [`proxy`] | [`ProxyTree`]: namespaces and callables built from a catalog |
//! | [`session`] | [`ApiSession`] and [`SessionBuilder`] |
//! | [`registry`] | [`SessionRegistry`] keyed by service and caller |
//! | [`error`] | [`ApiError`] |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use sigcall_client::{CallArgs, ClientConfig, SessionBuilder};
//!
//! let config = ClientConfig::from_env()?;
//! let session = SessionBuilder::from_config(&config)?.login()?;
//! let user = session.api()?.resolve("user.get")?.as_function().unwrap().clone();
//! let found = user.call(CallArgs::new().kwarg("email", "a@b.c"))?;
//! ```
//!
//! [`EndpointCatalog`]: sigcall_api::EndpointCatalog

pub mod authority;
pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod transport;

pub use authority::{
    Authority, AuthorityError, LibConfig, ServiceConfig, UserCode, WarningContext,
    WarningTemplate,
};
pub use catalog::{
    build_catalog, user_code_id, validate_catalog, ServiceInfo, LIB_DISPATCH_PATH,
    USER_CODE_ID_ARG, USER_CODE_PATH,
};
pub use config::{ClientConfig, ConfigError};
pub use error::ApiError;
pub use pipeline::{
    ApproveAll, CallArgs, DeclineAll, Dispatcher, FunctionKind, Prompter, RemoteFunction,
};
pub use proxy::{build_proxy_tree, Namespace, ProxyNode, ProxyTree, GET_ALL};
pub use registry::{SessionKey, SessionRegistry};
pub use session::{detached_trees, ApiSession, RefreshCallback, ServiceIdentity, SessionBuilder};
pub use transport::{HttpTransport, Transport, TransportError};
