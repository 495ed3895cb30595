//! Service identity metadata, `GET /api/v2/metadata`.

use serde::{Deserialize, Serialize};
use sigcall::{ProtocolVersion, Uid, VerifyKey};

/// Who a service is and which protocol versions it speaks.
///
/// ```json
/// {
///   "id": "5f0c7d3e-9a2b-4c1d-8e6f-0a1b2c3d4e5f",
///   "name": "canada-domain",
///   "verify_key": "z6MkpTHR8VNsBxYAAWHut2Geadd9jSwuias8siQmsDNyZCeT",
///   "protocol_version": "3",
///   "supported_protocols": ["2", "3", "dev"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub id: Uid,
    pub name: String,
    /// Key every result from this service is signed with.
    pub verify_key: VerifyKey,
    /// The service's current protocol version.
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub supported_protocols: Vec<ProtocolVersion>,
}

impl IdentityMetadata {
    /// The newest protocol version both sides speak.
    pub fn negotiate(&self, ours: &[ProtocolVersion]) -> Option<ProtocolVersion> {
        self.supported_protocols
            .iter()
            .filter(|p| ours.contains(p))
            .max()
            .copied()
    }
}
