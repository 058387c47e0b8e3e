//! Adaptable Bus (C3): demultiplexes one inbound frame stream onto one-shot
//! request/response futures keyed by correlation id, long-lived streaming
//! subscriptions keyed by event class, and string-tagged protocol
//! acknowledgements.
//!
//! Grounded on the request-id/server-id aliasing demultiplexer pattern: a
//! map per key space, each entry holding a channel to the waiting side, with
//! delivery driven by a single inbound loop rather than per-subscriber
//! polling.

mod pending;

pub use pending::{AckEntry, SubscriptionId};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::oneshot;
use twinlink_core::handle::AtomicHandle;
use twinlink_core::sync::RwLock;
use twinlink_core::{trace_read_lock, trace_write_lock};

use crate::adaptable::{Adaptable, StreamingType};
use crate::adapter::ProtocolAdapter;
use crate::errors::{AlreadySubscribedError, TimeoutError};

use pending::{CorrelationEntry, ProtocolStringEntry};

type StreamingHandler = Arc<dyn Fn(Adaptable) + Send + Sync>;

struct StreamingEntry {
    streaming_type: StreamingType,
    handler: StreamingHandler,
}

/// Removes a correlation entry on drop. Idempotent: if the entry was already
/// taken by [`AdaptableBus::try_complete_correlation`], the removal is a
/// harmless no-op.
struct CorrelationGuard {
    inner: Arc<Inner>,
    correlation_id: String,
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        trace_write_lock!(self.inner.correlation).remove(&self.correlation_id);
    }
}

/// Removes this subscriber's own protocol-string entry (by `id`, not
/// position) on drop, tearing down the tag's map entry too if it was the
/// last one. Idempotent for the same reason as [`CorrelationGuard`].
struct ProtocolStringGuard {
    inner: Arc<Inner>,
    tag: String,
    id: u64,
}

impl Drop for ProtocolStringGuard {
    fn drop(&mut self) {
        let mut map = trace_write_lock!(self.inner.protocol_string);
        if let Some(entries) = map.get_mut(&self.tag) {
            entries.retain(|entry| entry.id != self.id);
            if entries.is_empty() {
                map.remove(&self.tag);
            }
        }
    }
}

struct Inner {
    adapter: Arc<dyn ProtocolAdapter>,
    correlation: RwLock<HashMap<String, CorrelationEntry>>,
    protocol_string: RwLock<HashMap<String, Vec<ProtocolStringEntry>>>,
    streaming: RwLock<HashMap<SubscriptionId, StreamingEntry>>,
    ids: AtomicHandle,
}

/// The demultiplexer itself. Cheap to clone; all state lives behind an
/// `Arc`, so every clone observes the same subscriptions.
#[derive(Clone)]
pub struct AdaptableBus {
    inner: Arc<Inner>,
}

impl AdaptableBus {
    pub fn new(adapter: Arc<dyn ProtocolAdapter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                correlation: RwLock::new(HashMap::new()),
                protocol_string: RwLock::new(HashMap::new()),
                streaming: RwLock::new(HashMap::new()),
                ids: AtomicHandle::new(1),
            }),
        }
    }

    /// Register a long-lived handler for every adaptable classified as
    /// `streaming_type`. Returns a subscription id that can later be passed
    /// to [`AdaptableBus::unsubscribe`].
    pub fn subscribe_for_adaptable(
        &self,
        streaming_type: StreamingType,
        handler: impl Fn(Adaptable) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.inner.ids.next();
        let mut streaming = trace_write_lock!(self.inner.streaming);
        streaming.insert(
            id,
            StreamingEntry {
                streaming_type,
                handler: Arc::new(handler),
            },
        );
        id
    }

    /// Wait for the one adaptable whose `correlation-id` header equals
    /// `correlation_id`, or fail with [`TimeoutError`] after `timeout`.
    ///
    /// The returned future removes its own map entry on drop, whether it
    /// runs to completion, times out, or is simply cancelled by its caller
    /// (e.g. the losing side of a `select!`) — a request never outlives the
    /// future that was waiting on it.
    pub fn subscribe_once_for_adaptable(
        &self,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Adaptable, TimeoutError>> + Send + 'static {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();
        {
            let mut map = trace_write_lock!(self.inner.correlation);
            map.insert(correlation_id.clone(), CorrelationEntry { sender: tx });
        }
        let guard = CorrelationGuard {
            inner: self.inner.clone(),
            correlation_id,
        };
        async move {
            let _guard = guard;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(adaptable)) => Ok(adaptable),
                Ok(Err(_)) => Err(TimeoutError),
                Err(_) => Err(TimeoutError),
            }
        }
    }

    /// Wait for a bare text frame equal to `tag`. Multiple non-exclusive
    /// subscribers may coexist for the same tag.
    pub fn subscribe_once_for_string(
        &self,
        tag: impl Into<String>,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<String, TimeoutError>> + Send + 'static {
        let tag = tag.into();
        let id = self.inner.ids.next();
        let (tx, rx) = oneshot::channel();
        {
            let mut map = trace_write_lock!(self.inner.protocol_string);
            map.entry(tag.clone()).or_default().push(ProtocolStringEntry {
                id,
                sender: tx,
                exclusive: false,
            });
        }
        Self::await_tagged(self.inner.clone(), tag, id, rx, timeout)
    }

    /// As [`AdaptableBus::subscribe_once_for_string`], but fails immediately
    /// if another subscriber (exclusive or not) already holds `tag`. Used
    /// for `:ACK` tags, where only one start/stop can be in flight.
    pub fn subscribe_once_for_string_exclusively(
        &self,
        tag: impl Into<String>,
        timeout: Duration,
    ) -> Result<
        impl std::future::Future<Output = Result<String, TimeoutError>> + Send + 'static,
        AlreadySubscribedError,
    > {
        let tag = tag.into();
        let id = self.inner.ids.next();
        let (tx, rx) = oneshot::channel();
        {
            let mut map = trace_write_lock!(self.inner.protocol_string);
            let entries = map.entry(tag.clone()).or_default();
            if !entries.is_empty() {
                return Err(AlreadySubscribedError(tag));
            }
            entries.push(ProtocolStringEntry {
                id,
                sender: tx,
                exclusive: true,
            });
        }
        Ok(Self::await_tagged(self.inner.clone(), tag, id, rx, timeout))
    }

    /// Waits on `rx`, with a guard that removes this subscriber's own entry
    /// (identified by `id`, since several non-exclusive subscribers can
    /// share a `tag`) from the map on drop — on timeout, on normal
    /// completion (a no-op, since [`AdaptableBus::try_complete_protocol_string`]
    /// already removed it), and on cancellation by the caller alike. This is
    /// what lets a dropped `start()` free up an exclusive `:ACK` slot
    /// instead of wedging every later `start()` for the same tag.
    fn await_tagged(
        inner: Arc<Inner>,
        tag: String,
        id: u64,
        rx: oneshot::Receiver<String>,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<String, TimeoutError>> + Send + 'static {
        let guard = ProtocolStringGuard { inner, tag, id };
        async move {
            let _guard = guard;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(_)) => Err(TimeoutError),
                Err(_) => Err(TimeoutError),
            }
        }
    }

    /// Remove a streaming subscription. Returns whether one was present.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        trace_write_lock!(self.inner.streaming)
            .remove(&subscription_id)
            .is_some()
    }

    /// Entry point for inbound text frames. Performs, in order: exact
    /// protocol-string match, adaptable parsing, streaming dispatch,
    /// correlation-id completion.
    pub fn publish(&self, text: &str) {
        if self.try_complete_protocol_string(text) {
            return;
        }

        let adaptable = match self.inner.adapter.parse(text) {
            Ok(adaptable) => adaptable,
            Err(err) => {
                debug!("discarding unparseable frame: {err}");
                return;
            }
        };

        if let Some(streaming_type) = StreamingType::classify(&adaptable.topic_path) {
            self.dispatch_streaming(streaming_type, &adaptable);
        }

        if let Some(correlation_id) = adaptable.correlation_id().map(str::to_string) {
            self.try_complete_correlation(&correlation_id, adaptable);
        }
    }

    fn try_complete_protocol_string(&self, text: &str) -> bool {
        let mut map = trace_write_lock!(self.inner.protocol_string);
        let Some(entries) = map.get_mut(text) else {
            return false;
        };
        if entries.is_empty() {
            return false;
        }
        let entry = entries.remove(0);
        if entries.is_empty() {
            map.remove(text);
        }
        let _ = entry.sender.send(text.to_string());
        true
    }

    fn dispatch_streaming(&self, streaming_type: StreamingType, adaptable: &Adaptable) {
        let handlers: Vec<StreamingHandler> = {
            let streaming = trace_read_lock!(self.inner.streaming);
            streaming
                .values()
                .filter(|entry| entry.streaming_type == streaming_type)
                .map(|entry| entry.handler.clone())
                .collect()
        };
        for handler in handlers {
            let adaptable = adaptable.clone();
            handler(adaptable);
        }
    }

    fn try_complete_correlation(&self, correlation_id: &str, adaptable: Adaptable) {
        let entry = trace_write_lock!(self.inner.correlation).remove(correlation_id);
        if let Some(entry) = entry {
            let _ = entry.sender.send(adaptable);
        } else {
            trace!("no pending request for correlation id {correlation_id}");
        }
    }
}
