//! `Client`: the top-level façade that wires the nine components together
//! into the session engine described in the system overview.
//!
//! The façade owns construction order only; it does not add behaviour of
//! its own beyond `initialize`/`close` passthroughs and the handful of
//! registration helpers that span more than one component. Everything that
//! matters (reconnect, demultiplexing, replay, dispatch) lives in the
//! component it is named after.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{ProtocolAdapter, Signal};
use crate::adaptable::Adaptable;
use crate::auth::AuthProvider;
use crate::bus::AdaptableBus;
use crate::change::Change;
use crate::change_dispatcher;
use crate::config::ClientConfig;
use crate::engine::{ConnectionEngine, InitializeError};
use crate::errors::{ClientStateError, RequestError};
use crate::handle_base::{self, ExpectedAckLabel};
use crate::handler_registry::HandlerRegistry;
use crate::pointer_bus::PointerBus;
use crate::subscription_manager::SubscriptionManager;
use crate::transport::Connector;

/// The assembled session client. Cheap to clone; every clone shares the
/// same engine, bus, subscription set and handler registry.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    adapter: Arc<dyn ProtocolAdapter>,
    engine: ConnectionEngine,
    subscriptions: SubscriptionManager,
    pointer_bus: PointerBus,
    handlers: HandlerRegistry,
}

impl Client {
    /// Assemble a client from its external collaborators. Does not connect;
    /// call [`Client::initialize`] to do that.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthProvider>,
        adapter: Arc<dyn ProtocolAdapter>,
    ) -> Self {
        let bus = AdaptableBus::new(adapter.clone());
        let engine = ConnectionEngine::new(config.clone(), connector, auth, adapter.clone(), bus);
        let subscriptions = SubscriptionManager::new();
        engine.set_replay_source(Arc::new(subscriptions.clone()));

        let pointer_bus = PointerBus::new();
        change_dispatcher::install(engine.bus(), pointer_bus.clone());
        let handlers = HandlerRegistry::new(pointer_bus.clone());

        Self {
            config,
            adapter,
            engine,
            subscriptions,
            pointer_bus,
            handlers,
        }
    }

    /// Establish the connection. See [`ConnectionEngine::initialize`].
    pub async fn initialize(&self) -> Result<(), InitializeError> {
        self.engine.initialize().await
    }

    /// Best-effort disconnect; no reconnect follows.
    pub fn close(&self) {
        self.engine.close();
    }

    pub fn state(&self) -> crate::engine::state::ConnectionState {
        self.engine.state()
    }

    pub fn engine(&self) -> &ConnectionEngine {
        &self.engine
    }

    pub fn pointer_bus(&self) -> &PointerBus {
        &self.pointer_bus
    }

    /// Send `signal` and wait for its correlated response, per the Handle
    /// Base contract. `timeout` of `None` uses the client's configured
    /// request timeout.
    pub async fn send_and_expect(
        &self,
        signal: &dyn Signal,
        channel_live: bool,
        expected_ack_label: Option<ExpectedAckLabel>,
        success_type: &str,
        error_type: &str,
        timeout: Option<Duration>,
    ) -> Result<Adaptable, RequestError> {
        handle_base::send_and_expect(
            &self.engine,
            self.adapter.as_ref(),
            signal,
            channel_live,
            expected_ack_label,
            success_type,
            error_type,
            timeout.unwrap_or(self.config.request_timeout),
        )
        .await
    }

    /// Start a named streaming subscription. See
    /// [`SubscriptionManager::start`].
    pub async fn start_consumption(
        &self,
        name: impl Into<String>,
        start_cmd: &str,
        ack_tag: &str,
        params: Vec<(String, String)>,
    ) -> Result<(), RequestError> {
        self.subscriptions
            .start(
                &self.engine,
                name,
                start_cmd,
                ack_tag,
                params,
                self.config.request_timeout,
            )
            .await
    }

    /// Stop a named streaming subscription. See [`SubscriptionManager::stop`].
    pub async fn stop_consumption(
        &self,
        name: &str,
        stop_cmd: &str,
        ack_tag: &str,
    ) -> Result<(), RequestError> {
        self.subscriptions
            .stop(&self.engine, name, stop_cmd, ack_tag, self.config.request_timeout)
            .await
    }

    /// Register a change handler under `registration_id`, dispatched for
    /// every change matching `selector`. Fails fast on a duplicate id.
    pub fn register_for_changes(
        &self,
        registration_id: impl Into<String>,
        selector: &str,
        handler: impl Fn(&Change, &HashMap<String, String>) + Send + Sync + 'static,
    ) -> Result<(), ClientStateError> {
        self.handlers.register(registration_id, selector, handler)
    }

    /// Remove a previously-registered change handler. Returns whether one
    /// existed.
    pub fn deregister(&self, registration_id: &str) -> bool {
        self.handlers.deregister(registration_id)
    }
}
