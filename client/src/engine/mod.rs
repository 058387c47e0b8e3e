//! Connection Engine (C5): combines the Frame Transport, Retry Policy and
//! Adaptable Bus into the reconnect state machine, and replays subscription
//! messages after every reconnect.
//!
//! Grounded on the session event loop's state-driven reconnect handling: a
//! background task owns the transport exclusively and reacts to each
//! [`crate::transport::FrameEvent`] by updating engine state and, on
//! disconnect, restarting the connect attempt through the Retry Policy.
//! Unlike that event loop this one is a plain task rather than a polled
//! `Stream`, since nothing outside the engine needs to observe its internal
//! transitions frame-by-frame — only the bus and the disconnected listener
//! do, and both are invoked directly.

pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use log::{debug, error, info, warn};
use thiserror::Error;
use twinlink_core::backoff::{FixedDelay, NonRetrying};
use twinlink_core::sync::Mutex;

use crate::adapter::ProtocolAdapter;
use crate::auth::AuthProvider;
use crate::bus::AdaptableBus;
use crate::config::ClientConfig;
use crate::errors::{ClientStateError, ConnectError, ProtocolError};
use crate::retry::RetryPolicy;
use crate::transport::{Connector, FrameEvent, FrameSink, OutboundHeaders, Transport};

use state::{ConnectionState, DisconnectSource, DisconnectedContext, DisconnectedHandler};
pub use state::{REPLAY_POLL_ATTEMPTS, REPLAY_POLL_INTERVAL, SERVER_CLOSE_GRACE, ZOMBIE_WINDOW};

/// Supplies the verbatim subscription-start texts to resend after a
/// reconnect. Implemented by the Subscription Manager; injected after
/// construction to avoid a cyclic `Arc` between the two.
pub trait ReplaySource: Send + Sync {
    fn replay_entries(&self) -> Vec<String>;
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    ClientState(#[from] ClientStateError),
    #[error("client is not connected")]
    NotConnected,
}

/// Errors produced by [`ConnectionEngine::initialize`].
pub type InitializeError = ConnectError;

struct TrailingErrorLatch {
    notify: tokio::sync::Notify,
    cause: Mutex<Option<String>>,
}

impl TrailingErrorLatch {
    fn new() -> Self {
        Self {
            notify: tokio::sync::Notify::new(),
            cause: Mutex::new(None),
        }
    }

    fn reset(&self) {
        *self.cause.lock() = None;
    }

    fn report(&self, cause: String) {
        *self.cause.lock() = Some(cause);
        self.notify.notify_one();
    }

    async fn wait(&self, grace: Duration) -> Option<String> {
        tokio::select! {
            _ = self.notify.notified() => self.cause.lock().take(),
            _ = tokio::time::sleep(grace) => None,
        }
    }
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthProvider>,
    adapter: Arc<dyn ProtocolAdapter>,
    bus: AdaptableBus,
    sink: ArcSwapOption<Arc<dyn FrameSink>>,
    state: Mutex<ConnectionState>,
    reconnecting: AtomicBool,
    explicit_close: AtomicBool,
    trailing_error: TrailingErrorLatch,
    replay_source: ArcSwapOption<Arc<dyn ReplaySource>>,
    disconnected_listener: ArcSwapOption<Arc<dyn Fn(&mut DisconnectedContext) + Send + Sync>>,
    connection_error_handler: ArcSwapOption<Arc<dyn Fn(&ConnectError) + Send + Sync>>,
    close_channel_handler: ArcSwapOption<Arc<dyn Fn() + Send + Sync>>,
}

/// The Connection Engine. Cheap to clone; every clone shares the same
/// transport, state and subscriptions.
#[derive(Clone)]
pub struct ConnectionEngine {
    inner: Arc<Inner>,
}

impl ConnectionEngine {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthProvider>,
        adapter: Arc<dyn ProtocolAdapter>,
        bus: AdaptableBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                auth,
                adapter,
                bus,
                sink: ArcSwapOption::empty(),
                state: Mutex::new(ConnectionState::Idle),
                reconnecting: AtomicBool::new(false),
                explicit_close: AtomicBool::new(false),
                trailing_error: TrailingErrorLatch::new(),
                replay_source: ArcSwapOption::empty(),
                disconnected_listener: ArcSwapOption::empty(),
                connection_error_handler: ArcSwapOption::empty(),
                close_channel_handler: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn bus(&self) -> &AdaptableBus {
        &self.inner.bus
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn set_replay_source(&self, source: Arc<dyn ReplaySource>) {
        self.inner.replay_source.store(Some(Arc::new(source)));
    }

    pub fn on_disconnected(
        &self,
        listener: impl Fn(&mut DisconnectedContext) + Send + Sync + 'static,
    ) {
        let listener: Arc<dyn Fn(&mut DisconnectedContext) + Send + Sync> = Arc::new(listener);
        self.inner.disconnected_listener.store(Some(Arc::new(listener)));
    }

    pub fn on_connection_error(&self, handler: impl Fn(&ConnectError) + Send + Sync + 'static) {
        let handler: Arc<dyn Fn(&ConnectError) + Send + Sync> = Arc::new(handler);
        self.inner.connection_error_handler.store(Some(Arc::new(handler)));
    }

    pub fn on_close_channel_requested(&self, handler: impl Fn() + Send + Sync + 'static) {
        let handler: Arc<dyn Fn() + Send + Sync> = Arc::new(handler);
        self.inner.close_channel_handler.store(Some(Arc::new(handler)));
    }

    /// Report a protocol error that arrived with no matching pending
    /// request, so a concurrent server-close handler can attach it as the
    /// disconnect's cause within the grace window.
    pub fn report_trailing_error(&self, err: &ProtocolError) {
        self.inner.trailing_error.report(err.to_string());
    }

    /// Idle → Connecting → Connected. Uses a non-retrying policy unless
    /// `initial_connect_retry_enabled` is set, in which case failed attempts
    /// retry on the same fixed delay reconnects use.
    pub async fn initialize(&self) -> Result<(), InitializeError> {
        *self.inner.state.lock() = ConnectionState::Connecting;

        let engine = self.clone();
        let policy = if self.inner.config.initial_connect_retry_enabled {
            RetryPolicy::always_recoverable()
        } else {
            RetryPolicy::never_recoverable()
        };
        let policy = policy.notify_on_error({
            let engine = engine.clone();
            move |err: &ConnectError| {
                if let Some(handler) = engine.inner.connection_error_handler.load_full() {
                    handler(err);
                }
            }
        });

        let backoff: Box<dyn twinlink_core::backoff::Backoff> =
            if self.inner.config.initial_connect_retry_enabled {
                Box::new(FixedDelay::forever(self.inner.config.reconnect_delay))
            } else {
                Box::new(NonRetrying)
            };

        let result = policy
            .retry_to("initial-connect", BoxedBackoff(backoff), || {
                let engine = engine.clone();
                async move { engine.connect_once_boxed().await }
            })
            .await;

        match result {
            Ok(()) => {
                *self.inner.state.lock() = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => {
                *self.inner.state.lock() = ConnectionState::Closed;
                Err(err)
            }
        }
    }

    /// `emit(text)`: fails fast while reconnecting or before any connection
    /// has been established; otherwise forwards to the live transport.
    pub fn emit(&self, text: String) -> Result<(), EmitError> {
        if self.inner.reconnecting.load(Ordering::Acquire) {
            return Err(EmitError::ClientState(ClientStateError::Reconnecting));
        }
        match self.inner.sink.load_full() {
            Some(sink) => {
                sink.send_text(text);
                Ok(())
            }
            None => Err(EmitError::NotConnected),
        }
    }

    /// Explicit `close()`: best-effort disconnect, no reconnect follows.
    pub fn close(&self) {
        self.inner.explicit_close.store(true, Ordering::Release);
        *self.inner.state.lock() = ConnectionState::Closing;
        if let Some(sink) = self.inner.sink.load_full() {
            sink.disconnect();
        }
    }

    fn connect_once_boxed(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ConnectError>> + Send + '_>>
    {
        Box::pin(self.connect_once())
    }

    async fn connect_once(&self) -> Result<(), ConnectError> {
        let endpoint = self
            .inner
            .config
            .resolved_endpoint()
            .map_err(|err| ConnectError::ConnectFailed(err.to_string()))?;

        let mut headers = OutboundHeaders::default();
        headers.insert("User-Agent", user_agent());
        let acks: Vec<&str> = self.inner.config.declared_acks.iter().map(String::as_str).collect();
        headers.insert(
            "declared-acks",
            serde_json::to_string(&acks).unwrap_or_else(|_| "[]".to_string()),
        );
        self.inner.auth.prepare(&mut headers).await?;

        let (mut transport, sink) = self.inner.connector.connect(&endpoint, headers).await?;

        match transport.poll().await {
            FrameEvent::Connected(_headers) => {}
            FrameEvent::Error(err) => return Err(err),
            other => {
                warn!("unexpected first frame event while connecting: {other:?}");
                return Err(ConnectError::ConnectFailed(
                    "transport did not report connected first".to_string(),
                ));
            }
        }

        self.inner.sink.store(Some(Arc::new(sink)));
        self.inner.reconnecting.store(false, Ordering::Release);

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_read_loop(transport).await;
        });

        self.replay_subscriptions().await;
        Ok(())
    }

    async fn run_read_loop(&self, mut transport: Box<dyn Transport>) {
        loop {
            match transport.poll().await {
                FrameEvent::Connected(_) => {}
                FrameEvent::Text(text) => self.inner.bus.publish(&text),
                FrameEvent::Binary(len) => debug!("discarding {len}-byte binary frame"),
                FrameEvent::Error(err) => {
                    error!("transport error: {err}");
                    if let Some(handler) = self.inner.connection_error_handler.load_full() {
                        handler(&err);
                    }
                }
                FrameEvent::Disconnected {
                    closed_by_server, ..
                } => {
                    self.handle_disconnect(closed_by_server).await;
                    return;
                }
            }
        }
    }

    async fn handle_disconnect(&self, closed_by_server: bool) {
        self.inner.sink.store(None);

        if self.inner.explicit_close.load(Ordering::Acquire) {
            *self.inner.state.lock() = ConnectionState::Closed;
            return;
        }

        self.inner.trailing_error.reset();
        let cause = if closed_by_server {
            self.inner.trailing_error.wait(SERVER_CLOSE_GRACE).await
        } else {
            None
        };

        let mut context = DisconnectedContext {
            source: if closed_by_server {
                DisconnectSource::Server
            } else {
                DisconnectSource::Client
            },
            cause,
            handler: DisconnectedHandler::default(),
        };
        if let Some(listener) = self.inner.disconnected_listener.load_full() {
            listener(&mut context);
        }

        if context.handler.close_channel {
            if let Some(handler) = self.inner.close_channel_handler.load_full() {
                handler();
            }
        }

        let should_reconnect = context
            .handler
            .should_reconnect(self.inner.config.reconnect_enabled);

        if should_reconnect {
            self.reconnect().await;
        } else {
            *self.inner.state.lock() = ConnectionState::Zombie;
            let engine = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ZOMBIE_WINDOW).await;
                *engine.inner.state.lock() = ConnectionState::Closed;
                info!("zombie window elapsed, connection closed");
            });
        }
    }

    async fn reconnect(&self) {
        *self.inner.state.lock() = ConnectionState::Reconnecting;
        self.inner.reconnecting.store(true, Ordering::Release);

        let policy = RetryPolicy::always_recoverable().notify_on_error({
            let engine = self.clone();
            move |err: &ConnectError| {
                if let Some(handler) = engine.inner.connection_error_handler.load_full() {
                    handler(err);
                }
            }
        });

        let engine = self.clone();
        let result = policy
            .retry_to(
                "reconnect",
                FixedDelay::forever(self.inner.config.reconnect_delay),
                || {
                    let engine = engine.clone();
                    async move { engine.connect_once().await }
                },
            )
            .await;

        match result {
            Ok(()) => {
                *self.inner.state.lock() = ConnectionState::Connected;
            }
            Err(err) => {
                error!("reconnect ultimately failed: {err}");
                *self.inner.state.lock() = ConnectionState::Closed;
            }
        }
    }

    /// Wait until the `reconnecting` flag clears (polled every
    /// [`REPLAY_POLL_INTERVAL`], up to [`REPLAY_POLL_ATTEMPTS`] times), then
    /// re-emit every stored subscription-start text. Skips and logs if the
    /// wait times out.
    async fn replay_subscriptions(&self) {
        for _ in 0..REPLAY_POLL_ATTEMPTS {
            if !self.inner.reconnecting.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(REPLAY_POLL_INTERVAL).await;
        }
        if self.inner.reconnecting.load(Ordering::Acquire) {
            warn!("subscription replay skipped: reconnecting flag did not clear in time");
            return;
        }

        let Some(source) = self.inner.replay_source.load_full() else {
            return;
        };
        for text in source.replay_entries() {
            if let Err(err) = self.emit(text.clone()) {
                warn!("failed to replay subscription start '{text}': {err}");
            }
        }
    }
}

fn user_agent() -> String {
    format!("twinlink-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Adapts a boxed, dynamically-chosen backoff to the `Backoff` trait so
/// [`RetryPolicy::retry_to`] can be driven by either a non-retrying or a
/// fixed-delay schedule depending on configuration, without duplicating the
/// call site.
struct BoxedBackoff(Box<dyn twinlink_core::backoff::Backoff>);

impl twinlink_core::backoff::Backoff for BoxedBackoff {
    fn next(&mut self) -> Option<Duration> {
        self.0.next()
    }
}
