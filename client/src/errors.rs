//! The error taxonomy from the error-handling design: one small `thiserror`
//! enum per concern rather than a single flat error type, so call sites only
//! need to match on the errors that are actually possible for them.

use thiserror::Error;

use crate::bus::AckEntry;

/// Endpoint / schema configuration is invalid. Fatal at construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("endpoint uri '{0}' is not a valid ws:// or wss:// uri")]
    InvalidEndpoint(String),
    #[error(
        "configured endpoint path declares schema version {configured}, client expects {expected}"
    )]
    SchemaVersionMismatch { configured: u32, expected: u32 },
}

/// Failures reported by an [`crate::auth::AuthProvider`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("authentication provider failed: {0}")]
    ProviderFailed(String),
}

/// Failures that can occur while establishing a transport connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("handshake failed: status={status} reason={reason}")]
    HandshakeFailed {
        status: u16,
        reason: String,
        body: Option<String>,
    },
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connection interrupted: {0}")]
    Interrupted(String),
    #[error("connect timed out")]
    Timeout,
}

impl ConnectError {
    /// Whether a reconnect loop should treat this as worth retrying.
    ///
    /// Preserved verbatim from the source behaviour this crate implements:
    /// every connect error, including authentication failures, is considered
    /// recoverable during *reconnect* (not initial connect). See the open
    /// question in the design notes.
    pub fn is_recoverable_for_reconnect(&self) -> bool {
        true
    }
}

/// Failures at the frame transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame exceeds the maximum payload size of {max} bytes")]
    FrameTooLarge { max: usize },
    #[error("transport i/o error: {0}")]
    Io(String),
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Failures classifying or decoding an inbound adaptable.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    #[error("failed to parse adaptable: {0}")]
    ParseFailed(String),
    #[error("unrecognised adaptable type")]
    UnknownType,
    #[error("one or more requested acknowledgements failed")]
    AcknowledgementsFailed(Vec<AckEntry>),
    #[error("response did not match the expected type")]
    TypeMismatch,
}

/// A runtime error reported by the gateway in an `ErrorResponse` adaptable,
/// surfaced as the typed cause of the failing request future.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("runtime fault: status={status} message={message}")]
pub struct RuntimeFault {
    pub status: u16,
    pub message: String,
    pub error_code: Option<String>,
}

/// Errors caused by the state of the client itself rather than the network
/// or the gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientStateError {
    #[error("emit attempted while the client is reconnecting")]
    Reconnecting,
    #[error("a consumption request is already pending for '{0}'")]
    ConcurrentConsumptionRequest(String),
    #[error("registration id '{0}' is already in use")]
    DuplicateRegistrationId(String),
}

/// A one-shot subscription or request exceeded its deadline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Default)]
#[error("request timed out")]
pub struct TimeoutError;

/// Raised by [`crate::bus::AdaptableBus::subscribe_once_for_string_exclusively`]
/// when another subscriber already holds the tag.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("an exclusive subscription already exists for tag '{0}'")]
pub struct AlreadySubscribedError(pub String);

/// The unified error returned by request/response operations (C6, C7).
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    ClientState(#[from] ClientStateError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Runtime(#[from] RuntimeFault),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    AlreadySubscribed(#[from] AlreadySubscribedError),
    #[error("not connected")]
    NotConnected,
}
