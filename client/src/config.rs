//! Client configuration: a plain record with enumerated recognised options,
//! flattened out of any fluent builder per the design note that the core
//! takes explicit configuration records rather than baking a chain of
//! inherited builders into itself. Any builder convenience belongs in the
//! surrounding application.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ConfigurationError;

/// The JSON schema version this crate's wire layer understands.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustStoreConfig {
    pub location: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// The full set of user-facing configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `ws://` or `wss://` endpoint, normalised to end with
    /// `/ws/<schema-version>`.
    pub endpoint: String,

    /// Per-request timeout.
    #[serde(default = "defaults::request_timeout")]
    pub request_timeout: Duration,

    /// Labels the client promises to produce acknowledgements for, declared
    /// on the opening handshake. Immutable after construction.
    #[serde(default)]
    pub declared_acks: BTreeSet<String>,

    /// Whether the engine automatically reconnects on an unexpected
    /// disconnect.
    #[serde(default = "defaults::reconnect_enabled")]
    pub reconnect_enabled: bool,

    /// Whether the *initial* `initialize()` call retries on failure, rather
    /// than failing after one attempt.
    #[serde(default = "defaults::initial_connect_retry_enabled")]
    pub initial_connect_retry_enabled: bool,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "defaults::reconnect_delay")]
    pub reconnect_delay: Duration,

    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    #[serde(default)]
    pub trust_store: Option<TrustStoreConfig>,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: defaults::request_timeout(),
            declared_acks: BTreeSet::new(),
            reconnect_enabled: defaults::reconnect_enabled(),
            initial_connect_retry_enabled: defaults::initial_connect_retry_enabled(),
            reconnect_delay: defaults::reconnect_delay(),
            proxy: None,
            trust_store: None,
        }
    }

    /// Parse and validate the endpoint, normalising its path to
    /// `/ws/<schema-version>` and checking that an already-present schema
    /// segment matches [`SCHEMA_VERSION`].
    pub fn resolved_endpoint(&self) -> Result<Url, ConfigurationError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|_| ConfigurationError::InvalidEndpoint(self.endpoint.clone()))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConfigurationError::InvalidEndpoint(self.endpoint.clone()));
        }

        let path = url.path().trim_end_matches('/');
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [.., "ws", version] => {
                let configured: u32 = version
                    .parse()
                    .map_err(|_| ConfigurationError::InvalidEndpoint(self.endpoint.clone()))?;
                if configured != SCHEMA_VERSION {
                    return Err(ConfigurationError::SchemaVersionMismatch {
                        configured,
                        expected: SCHEMA_VERSION,
                    });
                }
            }
            _ => {
                url.set_path(&format!("{path}/ws/{SCHEMA_VERSION}"));
            }
        }
        Ok(url)
    }
}

impl twinlink_core::config::Config for ClientConfig {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Err(err) = self.resolved_endpoint() {
            errors.push(err.to_string());
        }
        if self.request_timeout.is_zero() {
            errors.push("request_timeout of zero would time out every request immediately; use an explicit per-call override instead".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn request_timeout() -> Duration {
        Duration::from_secs(60)
    }

    pub fn reconnect_enabled() -> bool {
        true
    }

    pub fn initial_connect_retry_enabled() -> bool {
        false
    }

    pub fn reconnect_delay() -> Duration {
        crate::retry::DEFAULT_RECONNECT_DELAY
    }
}
