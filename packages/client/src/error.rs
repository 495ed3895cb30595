//! Error values returned by sessions, proxies and the invocation pipeline.
//!
//! Every per-call failure comes back through `Result<_, ApiError>`; nothing
//! here panics. Construction-time problems (a reserved keyword in a
//! signature, a malformed path) are reported the same way from
//! [`SessionBuilder::build`](crate::SessionBuilder::build) and
//! [`build_catalog`](crate::build_catalog).

use sigcall::{CodecError, EnvelopeError, MigrationError, SignatureError, ValidationError};
use sigcall_api::ErrorDescriptor;
use thiserror::Error;

use crate::authority::AuthorityError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Arguments did not fit the endpoint's signature. Nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No such remote operation under `path`, or the caller may not see it.
    #[error("`{path}` has no member `{name}`; it does not exist or you are not permitted to use it")]
    UnknownMember { path: String, name: String },

    /// A reply failed verification, or was not signed by the pinned service key.
    #[error("reply signature verification failed")]
    InvalidSignature,

    #[error("endpoint `{path}` declares the reserved keyword `blocking`")]
    ReservedKeywordConflict { path: String },

    #[error("endpoint `{path}` declares parameter `{name}` more than once")]
    DuplicateParameter { path: String, name: String },

    #[error("endpoint path {0:?} is not a dotted identifier path")]
    InvalidPath(String),

    #[error("`{path}` is not a {expected}")]
    WrongMemberKind { path: String, expected: &'static str },

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("no active connection to the service")]
    TransportUnavailable,

    #[error(transparent)]
    Transport(TransportError),

    /// The service ran the call and reported a failure.
    #[error("remote error: {0}")]
    Remote(ErrorDescriptor),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("`{path}` can't be indexed; it has no `get_all` operation")]
    NotIndexable { path: String },

    #[error("index {index} is out of range for `{path}` ({len} items)")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("`{path}` is not a user-code function")]
    NotUserCode { path: String },

    #[error("catalog belongs to service {actual}, expected {expected}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("the service speaks none of the protocol versions this client supports")]
    NoCommonProtocol,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<EnvelopeError> for ApiError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::InvalidSignature => ApiError::InvalidSignature,
            EnvelopeError::Codec(c) => ApiError::Codec(c),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(_) => ApiError::TransportUnavailable,
            other => ApiError::Transport(other),
        }
    }
}

impl ApiError {
    /// Map a [`SignatureError`] found on the endpoint at `path`.
    pub fn from_signature(path: &str, e: SignatureError) -> Self {
        match e {
            SignatureError::ReservedKeyword(_) => ApiError::ReservedKeywordConflict {
                path: path.to_string(),
            },
            SignatureError::DuplicateParameter(name) => ApiError::DuplicateParameter {
                path: path.to_string(),
                name,
            },
        }
    }
}
