//! Calls and results, the two payloads carried in signed envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sigcall::{ProtocolVersion, SignedEnvelope, Uid, Value};

use crate::error::ErrorDescriptor;

/// Reserved keyword carrying the caller's negotiated protocol version, so the
/// receiver can pick the matching decode path.
pub const PROTOCOL_KWARG: &str = "communication_protocol";

/// A [`Call`] as sent on the wire.
pub type SignedCall = SignedEnvelope<Call>;

/// A [`CallResult`] as returned on the wire.
pub type SignedResult = SignedEnvelope<CallResult>;

/// One invocation of a remote endpoint. Immutable once signed.
///
/// ```json
/// {
///   "target": "5f0c7d3e-9a2b-4c1d-8e6f-0a1b2c3d4e5f",
///   "path": "widget.get",
///   "args": [{ "type": "int", "value": 3 }],
///   "kwargs": { "communication_protocol": { "type": "str", "value": "2" } },
///   "blocking": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// The service the call is addressed to.
    pub target: Uid,
    /// Dotted dispatch path on the service.
    pub path: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    /// When `false` the service answers with a job handle instead of waiting.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

fn default_blocking() -> bool {
    true
}

impl Call {
    pub fn new(target: Uid, path: impl Into<String>) -> Self {
        Self {
            target,
            path: path.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            blocking: true,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: BTreeMap<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Attach the negotiated protocol version under [`PROTOCOL_KWARG`].
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.kwargs
            .insert(PROTOCOL_KWARG.to_string(), Value::Str(protocol.to_string()));
        self
    }

    /// The protocol version attached by [`with_protocol`](Self::with_protocol).
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.kwargs
            .get(PROTOCOL_KWARG)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

/// Outcome of a call: a value or a remote error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResult {
    Ok {
        value: Value,
        /// Set by the service when this call changed what the caller may
        /// see (e.g. a permission grant), so the client should refresh.
        #[serde(default)]
        require_api_update: bool,
    },
    Err { error: ErrorDescriptor },
}

impl CallResult {
    pub fn ok(value: impl Into<Value>) -> Self {
        CallResult::Ok {
            value: value.into(),
            require_api_update: false,
        }
    }

    /// A successful result that also asks the client to refresh its catalog.
    pub fn ok_with_update(value: impl Into<Value>) -> Self {
        CallResult::Ok {
            value: value.into(),
            require_api_update: true,
        }
    }

    pub fn err(error: ErrorDescriptor) -> Self {
        CallResult::Err { error }
    }

    pub fn requires_api_update(&self) -> bool {
        matches!(
            self,
            CallResult::Ok {
                require_api_update: true,
                ..
            }
        )
    }

    pub fn into_result(self) -> Result<Value, ErrorDescriptor> {
        match self {
            CallResult::Ok { value, .. } => Ok(value),
            CallResult::Err { error } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn protocol_kwarg_roundtrip() {
        let call = Call::new(Uid::new(), "widget.get").with_protocol(ProtocolVersion::Stable(2));
        assert_eq!(call.protocol(), Some(ProtocolVersion::Stable(2)));
        assert_eq!(
            call.kwargs[PROTOCOL_KWARG],
            Value::Str("2".into())
        );
    }

    #[test]
    fn blocking_defaults_to_true_on_the_wire() {
        let json = format!(
            r#"{{"target":"{}","path":"widget.get"}}"#,
            Uid::new()
        );
        let call: Call = serde_json::from_str(&json).unwrap();
        assert!(call.blocking);
        assert!(call.args.is_empty());
    }

    #[test]
    fn target_is_hyphenated_on_the_wire() {
        let target: Uid = "5f0c7d3e9a2b4c1d8e6f0a1b2c3d4e5f".parse().unwrap();
        let json = serde_json::to_value(Call::new(target, "widget.get")).unwrap();
        assert_eq!(json["target"], "5f0c7d3e-9a2b-4c1d-8e6f-0a1b2c3d4e5f");
        assert_eq!(target.to_string(), "5f0c7d3e9a2b4c1d8e6f0a1b2c3d4e5f");
    }

    #[test]
    fn result_tagging() {
        let ok = serde_json::to_value(CallResult::ok(1)).unwrap();
        assert_eq!(ok["status"], "ok");
        assert_eq!(ok["require_api_update"], false);

        let err = CallResult::err(ErrorDescriptor::new(codes::NOT_FOUND, "no such widget"));
        let json = serde_json::to_string(&err).unwrap();
        let back: CallResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(back.into_result().is_err());
    }

    #[test]
    fn update_flag() {
        assert!(CallResult::ok_with_update(Value::None).requires_api_update());
        assert!(!CallResult::ok(Value::None).requires_api_update());
    }
}
