//! Remote error descriptor carried in a failed [`CallResult`](crate::CallResult).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Business-level failure reported by the service.
///
/// ```json
/// { "code": "not_found", "message": "widget 3 does not exist" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// Machine-readable error code. See [`codes`].
    pub code: String,

    /// Human-readable description of the problem.
    pub message: String,

    /// Optional diagnostic trace from the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorDescriptor {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorDescriptor {}

/// Well-known error codes.
pub mod codes {
    pub const INVALID_PARAMETER: &str = "invalid_parameter";
    pub const INVALID_SIGNATURE: &str = "invalid_signature";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNKNOWN_ENDPOINT: &str = "unknown_endpoint";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
