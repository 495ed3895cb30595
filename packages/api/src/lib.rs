//! Wire types for the sigcall remote-invocation layer.
//!
//! Everything here crosses the wire between a client session and a service:
//! the signed call and its result, the endpoint catalog a caller is allowed
//! to see, service identity metadata, and the action records library calls
//! are expressed as.
//!
//! # Routes
//!
//! | Method | Path | Type |
//! |--------|------|------|
//! | POST | `/api/v2/api_call` | [`SignedCall`] → [`SignedResult`] |
//! | GET | `/api/v2/metadata` | → [`IdentityMetadata`] |
//! | GET | `/api/v2/api?verify_key=..&communication_protocol=..` | → [`EndpointCatalog`] |

pub mod action;
pub mod call;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod job;

pub use action::{Action, ActionType};
pub use call::{Call, CallResult, SignedCall, SignedResult, PROTOCOL_KWARG};
pub use endpoint::{
    EndpointCatalog, EndpointDescriptor, EndpointWarning, LibEndpointDescriptor, Role,
};
pub use error::ErrorDescriptor;
pub use identity::IdentityMetadata;
pub use job::{JobHandle, JOBS_BY_USER_CODE_PATH};

/// Route paths served by a sigcall service.
pub mod routes {
    pub const API_CALL: &str = "/api/v2/api_call";
    pub const METADATA: &str = "/api/v2/metadata";
    pub const CATALOG: &str = "/api/v2/api";
}
