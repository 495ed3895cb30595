//! Endpoint descriptors and the per-caller endpoint catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use sigcall::{ProtocolVersion, Signature, Uid, Value};

/// A caller's role on a service, lowest to highest privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    None,
    Guest,
    DataScientist,
    DataOwner,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::None => "none",
            Role::Guest => "guest",
            Role::DataScientist => "data_scientist",
            Role::DataOwner => "data_owner",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// A usage warning shown before an endpoint is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointWarning {
    /// Message already rendered for the caller.
    pub message: String,
    /// Whether the caller must confirm before the call is dispatched.
    #[serde(default)]
    pub confirmation: bool,
    /// Disabled warnings are never shown.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl EndpointWarning {
    pub fn new(message: impl Into<String>, confirmation: bool) -> Self {
        Self {
            message: message.into(),
            confirmation,
            enabled: true,
        }
    }
}

/// One operation a service exposes to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub id: Uid,
    /// Dotted path the call is dispatched to.
    pub service_path: String,
    /// Dotted path the endpoint appears under in the proxy tree.
    pub module_path: String,
    /// Leaf name in the proxy tree; may differ from the last segment of
    /// `module_path`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_string: Option<String>,
    pub signature: Signature,
    /// The endpoint binds a receiver, so a leading `self` parameter is real.
    #[serde(default)]
    pub has_self: bool,
    /// Keyword values merged into every call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prebound: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<EndpointWarning>,
}

impl EndpointDescriptor {
    /// A descriptor whose module path equals its service path and whose leaf
    /// name is the last path segment.
    pub fn new(path: impl Into<String>, signature: Signature) -> Self {
        let path = path.into();
        let name = path.rsplit('.').next().unwrap_or_default().to_string();
        Self {
            id: Uid::new(),
            service_path: path.clone(),
            module_path: path,
            name,
            description: String::new(),
            doc_string: None,
            signature,
            has_self: false,
            prebound: BTreeMap::new(),
            warning: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_module_path(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = module_path.into();
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc_string = Some(doc.into());
        self
    }

    pub fn with_prebound(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.prebound.insert(name.into(), value.into());
        self
    }

    pub fn with_warning(mut self, warning: EndpointWarning) -> Self {
        self.warning = Some(warning);
        self
    }

    pub fn with_self(mut self) -> Self {
        self.has_self = true;
        self
    }

    /// The namespace part of `module_path`, without the trailing segment.
    pub fn namespace(&self) -> &str {
        self.module_path
            .rsplit_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or_default()
    }
}

/// A library function routed through the generic dispatch path.
///
/// Same shape as [`EndpointDescriptor`]: `service_path` is always the
/// dispatch operation and `module_path` is the library's own dotted path,
/// carried as metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibEndpointDescriptor(EndpointDescriptor);

impl LibEndpointDescriptor {
    pub fn new(descriptor: EndpointDescriptor) -> Self {
        Self(descriptor)
    }

    pub fn into_inner(self) -> EndpointDescriptor {
        self.0
    }
}

impl Deref for LibEndpointDescriptor {
    type Target = EndpointDescriptor;
    fn deref(&self) -> &EndpointDescriptor {
        &self.0
    }
}

/// Everything one caller may invoke on one service, at one protocol version.
///
/// Keyed by the unique endpoint key (usually the module path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCatalog {
    pub service_id: Uid,
    pub service_name: String,
    pub protocol: ProtocolVersion,
    pub role: Role,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointDescriptor>,
    #[serde(default)]
    pub lib_endpoints: BTreeMap<String, LibEndpointDescriptor>,
}

impl EndpointCatalog {
    pub fn new(
        service_id: Uid,
        service_name: impl Into<String>,
        protocol: ProtocolVersion,
        role: Role,
    ) -> Self {
        Self {
            service_id,
            service_name: service_name.into(),
            protocol,
            role,
            endpoints: BTreeMap::new(),
            lib_endpoints: BTreeMap::new(),
        }
    }

    pub fn endpoint(&self, key: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.get(key)
    }

    pub fn lib_endpoint(&self, key: &str) -> Option<&LibEndpointDescriptor> {
        self.lib_endpoints.get(key)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len() + self.lib_endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
