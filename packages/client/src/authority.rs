//! The authorization collaborator consulted when a catalog is built.
//!
//! An [`Authority`] decides which endpoints a caller may see. It resolves the
//! caller's [`Role`], lists the service configurations visible to that role,
//! the library configurations visible to the caller, and the caller's own
//! user-code objects. The catalog builder turns these into descriptors.

use std::collections::BTreeMap;

use sigcall::{Signature, Uid, VerifyKey};
use sigcall_api::{EndpointWarning, Role};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthorityError {
    #[error("no role is known for caller {0}")]
    UnknownCaller(String),

    #[error("authority unavailable: {0}")]
    Unavailable(String),
}

/// Source of role and endpoint configuration for one service.
pub trait Authority: Send + Sync {
    fn role_for(&self, caller: &VerifyKey) -> Result<Role, AuthorityError>;

    /// Service endpoint configurations visible to `role`, keyed by path.
    fn service_configs(&self, role: Role) -> Result<BTreeMap<String, ServiceConfig>, AuthorityError>;

    /// Library function configurations visible to `caller`, keyed by the
    /// library's dotted path.
    fn lib_configs(&self, caller: &VerifyKey) -> Result<BTreeMap<String, LibConfig>, AuthorityError>;

    /// User-code objects owned by `caller`.
    fn user_code(&self, _caller: &VerifyKey) -> Result<Vec<UserCode>, AuthorityError> {
        Ok(Vec::new())
    }
}

/// Registered configuration of one service endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Leaf name shown in the proxy tree.
    pub public_name: String,
    pub doc_string: Option<String>,
    pub signature: Signature,
    pub warning: Option<WarningTemplate>,
    /// Configurations mirrored from a library are served through the
    /// library path instead and skipped here.
    pub is_from_lib: bool,
}

impl ServiceConfig {
    pub fn new(public_name: impl Into<String>, signature: Signature) -> Self {
        Self {
            public_name: public_name.into(),
            doc_string: None,
            signature,
            warning: None,
            is_from_lib: false,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc_string = Some(doc.into());
        self
    }

    pub fn with_warning(mut self, warning: WarningTemplate) -> Self {
        self.warning = Some(warning);
        self
    }

    pub fn from_lib(mut self) -> Self {
        self.is_from_lib = true;
        self
    }
}

/// Registered configuration of one library function.
#[derive(Debug, Clone, PartialEq)]
pub struct LibConfig {
    pub public_name: String,
    pub doc_string: Option<String>,
    pub signature: Signature,
}

impl LibConfig {
    pub fn new(public_name: impl Into<String>, signature: Signature) -> Self {
        Self {
            public_name: public_name.into(),
            doc_string: None,
            signature,
        }
    }
}

/// A code object submitted by the caller and callable by name.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCode {
    pub id: Uid,
    pub func_name: String,
    pub signature: Signature,
}

/// Who is about to see a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningContext {
    pub role: Role,
    pub service_name: String,
    /// The service-wide switch; when off, no warning is ever shown.
    pub enable_warnings: bool,
}

/// A warning message with `{role}` and `{service}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningTemplate {
    pub template: String,
    pub confirmation: bool,
}

impl WarningTemplate {
    pub fn new(template: impl Into<String>, confirmation: bool) -> Self {
        Self {
            template: template.into(),
            confirmation,
        }
    }

    /// Render for one caller.
    pub fn render(&self, ctx: &WarningContext) -> EndpointWarning {
        let message = self
            .template
            .replace("{role}", &ctx.role.to_string())
            .replace("{service}", &ctx.service_name);
        EndpointWarning {
            message,
            confirmation: self.confirmation,
            enabled: ctx.enable_warnings,
        }
    }
}
