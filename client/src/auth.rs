//! Authentication is a capability trait behind dynamic dispatch: the engine
//! never names a concrete credential, token or dummy provider, mirroring how
//! the teacher's builder accepts an opaque identity/token provider rather
//! than baking a scheme into the session itself.

use async_trait::async_trait;

use crate::errors::AuthError;
use crate::transport::OutboundHeaders;

/// Injects authentication into the opening WebSocket handshake and, if the
/// scheme requires it, refreshes credentials over the life of the session.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Add whatever headers this scheme needs to authenticate the upcoming
    /// connect attempt. Called once per connect, including every reconnect.
    async fn prepare(&self, headers: &mut OutboundHeaders) -> Result<(), AuthError>;

    /// A stable identifier for the logical session this provider represents,
    /// used only for logging.
    fn configuration(&self) -> &str;

    /// Release any resources (background refresh tasks, cached tokens) held
    /// by this provider. Called once, when the client is closed.
    async fn destroy(&self) {}
}

/// An [`AuthProvider`] that injects nothing. Useful for gateways that sit
/// behind a trusted network boundary, and for tests.
#[derive(Debug, Clone, Default)]
pub struct NoopAuthProvider {
    configuration: String,
}

impl NoopAuthProvider {
    pub fn new(configuration: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for NoopAuthProvider {
    async fn prepare(&self, _headers: &mut OutboundHeaders) -> Result<(), AuthError> {
        Ok(())
    }

    fn configuration(&self) -> &str {
        &self.configuration
    }
}
