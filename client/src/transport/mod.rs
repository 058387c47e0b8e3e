//! Frame Transport: owns a single WebSocket, sends and receives text frames,
//! and reports connection lifecycle events.
//!
//! [`Transport::poll`] is modelled as a cancel-safe, cancellation-tolerant
//! stream of [`FrameEvent`]s rather than a set of callbacks the transport
//! invokes into the engine. A callback trait would need the transport to
//! hold a reference back to whatever owns it, which is exactly the cyclic
//! ownership this design avoids: the engine owns the transport outright and
//! drives it by polling, so there is never a back-reference from the
//! transport to its caller.

mod ws;

pub use ws::{WsConnector, WsFrameSink, WsTransport};

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::errors::ConnectError;

/// Headers attached to the opening WebSocket handshake: `User-Agent`,
/// `declared-acks`, and whatever an [`crate::auth::AuthProvider`] injects.
#[derive(Debug, Clone, Default)]
pub struct OutboundHeaders(HashMap<String, String>);

impl OutboundHeaders {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Headers returned by the server on a successful handshake.
pub type ConnectedHeaders = HashMap<String, String>;

/// One event observed while polling a live [`Transport`].
#[derive(Debug)]
pub enum FrameEvent {
    /// The socket finished its upgrade handshake and the transport is ready
    /// to send and receive text frames.
    Connected(ConnectedHeaders),
    /// A complete text frame arrived.
    Text(String),
    /// A binary frame arrived. The protocol never uses binary frames; this
    /// is logged and discarded by the caller.
    Binary(usize),
    /// The socket closed. `closed_by_server` distinguishes a server-sent
    /// close frame from a close this side initiated.
    Disconnected {
        server_frame: Option<String>,
        client_frame: Option<String>,
        closed_by_server: bool,
    },
    /// A transport-level error occurred. Does not imply the socket is
    /// closed; a `Disconnected` event follows separately if it is.
    Error(ConnectError),
}

/// Attempts to establish a connection. Does not retry; retries are the
/// Connection Engine's responsibility, driven by the Retry Policy.
///
/// Returns the poll-only [`Transport`] half alongside a cheap, cloneable
/// [`FrameSink`] handle. The engine's event loop keeps exclusive ownership
/// of the former; the latter is published for senders to reach through an
/// atomic reference, so a write is never blocked behind the loop's read
/// await point. This is the one-way push the cyclic-ownership design note
/// calls for: nothing here ever holds a reference back to the engine.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &url::Url,
        headers: OutboundHeaders,
    ) -> Result<(Box<dyn Transport>, Arc<dyn FrameSink>), ConnectError>;
}

/// A single full-duplex text-frame carrier.
///
/// `poll` must be cancel-safe: callers may drop the returned future without
/// polling it to completion (for example when racing it against a shutdown
/// signal) and must be able to call `poll` again afterwards without having
/// lost any frame.
pub trait Transport: Send {
    fn poll(&mut self) -> std::pin::Pin<Box<dyn Future<Output = FrameEvent> + Send + '_>>;
}

/// The write half of a connected transport: cheap to clone, safe to hold
/// behind an atomic reference, and never blocks the caller.
pub trait FrameSink: Send + Sync {
    /// Send a text frame. Non-blocking: if the outbound channel is closed or
    /// full, the frame is silently dropped and an error is logged.
    fn send_text(&self, text: String);

    /// Best-effort close. Does not wait for the close handshake to finish.
    fn disconnect(&self);
}
