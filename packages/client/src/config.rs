//! Client configuration, populated from environment variables.

use std::time::Duration;

use sigcall::{KeyError, ProtocolVersion, SigningKey};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a valid protocol version: {message}")]
    Protocol { var: &'static str, message: String },

    #[error("{var} is not a valid signing seed: {source}")]
    Seed {
        var: &'static str,
        #[source]
        source: KeyError,
    },

    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Runtime configuration for a client session.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SIGCALL_URL` | `http://127.0.0.1:8080` | Base URL of the remote service |
/// | `SIGCALL_PROTOCOL` | `dev` | Newest protocol version the client speaks |
/// | `SIGCALL_SEED` | (absent = fresh key) | Hex-encoded 32-byte Ed25519 seed |
/// | `SIGCALL_TIMEOUT_SECS` | `30` | HTTP timeout for the transport |
/// | `SIGCALL_PIN_SERVICE_KEY` | `true` | Reject replies not signed by the service's advertised key |
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the service, without a trailing slash.
    pub url: String,

    /// Newest protocol version offered during negotiation.
    pub protocol: ProtocolVersion,

    /// The caller's signing key. Generated when no seed is configured.
    pub signing_key: SigningKey,

    pub timeout: Duration,

    pub pin_service_key: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".into(),
            protocol: ProtocolVersion::Dev,
            signing_key: SigningKey::generate(),
            timeout: Duration::from_secs(30),
            pin_service_key: true,
        }
    }
}

impl ClientConfig {
    /// Populate config from the process environment, applying defaults where absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Populate config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let url = lookup("SIGCALL_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.url);

        let protocol = match lookup("SIGCALL_PROTOCOL") {
            Some(v) => v.parse().map_err(|message| ConfigError::Protocol {
                var: "SIGCALL_PROTOCOL",
                message,
            })?,
            None => defaults.protocol,
        };

        let signing_key = match lookup("SIGCALL_SEED") {
            Some(seed) => SigningKey::from_hex_seed(&seed).map_err(|source| ConfigError::Seed {
                var: "SIGCALL_SEED",
                source,
            })?,
            None => defaults.signing_key,
        };

        let timeout = match lookup("SIGCALL_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse::<u64>().map_err(|_| ConfigError::Invalid {
                var: "SIGCALL_TIMEOUT_SECS",
                expected: "a whole number of seconds",
                value: v.clone(),
            })?),
            None => defaults.timeout,
        };

        let pin_service_key = match lookup("SIGCALL_PIN_SERVICE_KEY").as_deref() {
            None => defaults.pin_service_key,
            Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SIGCALL_PIN_SERVICE_KEY",
                    expected: "true or false",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            url,
            protocol,
            signing_key,
            timeout,
            pin_service_key,
        })
    }
}
