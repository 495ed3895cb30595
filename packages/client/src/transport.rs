//! The transport collaborator and its HTTP implementation.
//!
//! A [`Transport`] carries one signed call to the service and returns the
//! signed reply. It must not re-encode the envelope's payload bytes: the
//! JSON form carries them hex-encoded, so they survive the round trip
//! byte for byte.

use std::time::Duration;

use sigcall::{ProtocolVersion, VerifyKey};
use sigcall_api::{routes, EndpointCatalog, IdentityMetadata, SignedCall, SignedResult};
use thiserror::Error;
use tracing::debug;
use urlencoding::encode;

use crate::config::ClientConfig;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// No connection could be made.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("service answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed reply: {0}")]
    Decode(String),
}

/// One request/response operation per call. Retries, pooling and timeouts
/// are the implementation's business.
pub trait Transport: Send + Sync {
    fn send_signed(&self, envelope: &SignedCall) -> Result<SignedResult, TransportError>;

    fn fetch_service_identity(&self, caller: &VerifyKey) -> Result<IdentityMetadata, TransportError>;

    /// The catalog `caller` may see at `protocol`.
    fn fetch_catalog(
        &self,
        caller: &VerifyKey,
        protocol: ProtocolVersion,
    ) -> Result<EndpointCatalog, TransportError>;
}

/// Blocking HTTP transport speaking JSON to a sigcall service.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(&config.url, config.timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/api/v2/api_call`
    pub fn call_url(&self) -> String {
        format!("{}{}", self.base_url, routes::API_CALL)
    }

    /// `{base}/api/v2/metadata`
    pub fn metadata_url(&self) -> String {
        format!("{}{}", self.base_url, routes::METADATA)
    }

    /// `{base}/api/v2/api?verify_key={key}&communication_protocol={protocol}`
    pub fn catalog_url(&self, caller: &VerifyKey, protocol: ProtocolVersion) -> String {
        format!(
            "{}{}?verify_key={}&communication_protocol={}",
            self.base_url,
            routes::CATALOG,
            encode(&caller.to_multibase()),
            encode(&protocol.to_string())
        )
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::blocking::Response,
    ) -> Result<T, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Undecodable bodies are [`TransportError::Decode`]; connect, timeout and
/// every other request failure is [`TransportError::Unavailable`].
fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Unavailable(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn send_signed(&self, envelope: &SignedCall) -> Result<SignedResult, TransportError> {
        let url = self.call_url();
        debug!(%url, signer = %envelope.signer(), "sending signed call");
        let resp = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .map_err(request_error)?;
        Self::read_json(resp)
    }

    fn fetch_service_identity(&self, _caller: &VerifyKey) -> Result<IdentityMetadata, TransportError> {
        let resp = self
            .client
            .get(self.metadata_url())
            .send()
            .map_err(request_error)?;
        Self::read_json(resp)
    }

    fn fetch_catalog(
        &self,
        caller: &VerifyKey,
        protocol: ProtocolVersion,
    ) -> Result<EndpointCatalog, TransportError> {
        let resp = self
            .client
            .get(self.catalog_url(caller, protocol))
            .send()
            .map_err(request_error)?;
        Self::read_json(resp)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
