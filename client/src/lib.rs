#![warn(missing_docs)]

//! The session engine for a bidirectional, message-oriented client that
//! speaks a JSON-framed request/response + event-stream protocol over a
//! single long-lived WebSocket.
//!
//! This crate owns the socket, multiplexes concurrent in-flight requests
//! over a single frame sequence, routes asynchronous events to
//! user-registered handlers, manages streaming subscription lifecycles, and
//! transparently recovers the session on disconnect without losing
//! registrations. It does not know the domain schema: frames are opaque
//! [`adaptable::Adaptable`] records produced and consumed by an external
//! [`adapter::ProtocolAdapter`], and authentication, entity/domain models,
//! and high-level CRUD façades are all out of scope.
//!
//! The pieces, in dependency order:
//! - [`transport`] — the WebSocket itself.
//! - [`retry`] — a recoverability-gated retry schedule.
//! - [`bus`] — demultiplexes inbound frames onto one-shot and streaming
//!   subscribers.
//! - [`pointer_bus`] — hierarchical JSON-pointer selector pub/sub for
//!   change notifications.
//! - [`engine`] — the reconnect state machine tying the above together.
//! - [`handle_base`] — the request/response primitive.
//! - [`subscription_manager`] — declared streaming subscriptions and their
//!   acknowledgements.
//! - [`change_dispatcher`] — translates entity events into changes on the
//!   pointer bus.
//! - [`handler_registry`] — deduplicated user registration bookkeeping.
//!
//! [`client::Client`] assembles all of the above into one façade.

pub mod adaptable;
pub mod adapter;
pub mod auth;
pub mod bus;
pub mod change;
pub mod change_dispatcher;
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod handle_base;
pub mod handler_registry;
pub mod pointer_bus;
pub mod retry;
pub mod subscription_manager;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use errors::RequestError;
