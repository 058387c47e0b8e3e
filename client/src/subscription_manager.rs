//! Subscription Manager (C7): owns one entry per named streaming
//! subscription (`START-SEND-EVENTS` and friends), acknowledges it against
//! the gateway, and replays every active entry after a reconnect.
//!
//! Grounded on the subscription registry pattern used for OPC UA
//! subscriptions: a map from name to subscription state behind a single
//! lock, minted ids from an [`AtomicHandle`], with the request/response
//! plumbing itself delegated to the same one-shot bus primitives the
//! request/response handles use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use twinlink_core::sync::RwLock;
use twinlink_core::{trace_read_lock, trace_write_lock};

use crate::bus::AdaptableBus;
use crate::engine::{ConnectionEngine, ReplaySource};
use crate::errors::{ClientStateError, RequestError, RuntimeFault};

/// One active streaming subscription: the verbatim start command text (with
/// its correlation id already stripped back out) and the params it was
/// started with, kept so a reconnect can regenerate a fresh start command.
#[derive(Debug, Clone)]
struct Entry {
    start_cmd: String,
    params: Vec<(String, String)>,
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    pending: AtomicBool,
}

/// Maintains the set of currently-active streaming subscriptions and
/// replays them after a reconnect.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                pending: AtomicBool::new(false),
            }),
        }
    }

    /// Begin a named streaming subscription.
    ///
    /// `start_cmd` is the control string without its `?params`, e.g.
    /// `"START-SEND-EVENTS"`. `ack_tag` is the bare acknowledgement string
    /// the gateway sends back, e.g. `"START-SEND-EVENTS:ACK"`.
    pub async fn start(
        &self,
        engine: &ConnectionEngine,
        name: impl Into<String>,
        start_cmd: &str,
        ack_tag: &str,
        params: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<(), RequestError> {
        let name = name.into();
        if self.inner.pending.swap(true, Ordering::AcqRel) {
            return Err(ClientStateError::ConcurrentConsumptionRequest(name).into());
        }
        let result = self
            .start_inner(engine, &name, start_cmd, ack_tag, &params, timeout)
            .await;
        self.inner.pending.store(false, Ordering::Release);
        if result.is_ok() {
            let entry = Entry {
                start_cmd: start_cmd.to_string(),
                params,
            };
            trace_write_lock!(self.inner.entries).insert(name, entry);
        }
        result
    }

    async fn start_inner(
        &self,
        engine: &ConnectionEngine,
        name: &str,
        start_cmd: &str,
        ack_tag: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<(), RequestError> {
        let correlation_id = Uuid::new_v4().to_string();
        let command = build_command(start_cmd, params, &correlation_id);

        let ack_waiter = engine
            .bus()
            .subscribe_once_for_string_exclusively(ack_tag, timeout)
            .map_err(|err| {
                let _ = err;
                ClientStateError::ConcurrentConsumptionRequest(name.to_string())
            })?;
        let error_waiter = engine
            .bus()
            .subscribe_once_for_adaptable(correlation_id, timeout);

        engine.emit(command)?;

        tokio::select! {
            ack = ack_waiter => {
                ack?;
                Ok(())
            }
            error = error_waiter => {
                let adaptable = error?;
                Err(RequestError::Runtime(runtime_fault_from(&adaptable)))
            }
        }
    }

    /// Stop a named streaming subscription. Completes immediately, without
    /// producing protocol traffic, if the subscription is not currently
    /// active.
    pub async fn stop(
        &self,
        engine: &ConnectionEngine,
        name: &str,
        stop_cmd: &str,
        ack_tag: &str,
        timeout: Duration,
    ) -> Result<(), RequestError> {
        let was_active = trace_write_lock!(self.inner.entries).remove(name).is_some();
        if !was_active {
            return Ok(());
        }

        let ack_waiter = engine.bus().subscribe_once_for_string(ack_tag, timeout);
        engine.emit(stop_cmd.to_string())?;
        ack_waiter.await?;
        Ok(())
    }

    pub fn is_active(&self, name: &str) -> bool {
        trace_read_lock!(self.inner.entries).contains_key(name)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplaySource for SubscriptionManager {
    /// Every active subscription's start command, rebuilt with a fresh
    /// correlation id so the gateway does not mistake it for a retry of the
    /// original request.
    fn replay_entries(&self) -> Vec<String> {
        trace_read_lock!(self.inner.entries)
            .values()
            .map(|entry| build_command(&entry.start_cmd, &entry.params, &Uuid::new_v4().to_string()))
            .collect()
    }
}

fn build_command(start_cmd: &str, params: &[(String, String)], correlation_id: &str) -> String {
    let mut all_params: Vec<(String, String)> = params.to_vec();
    all_params.push(("correlation-id".to_string(), correlation_id.to_string()));
    let query = all_params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{start_cmd}?{query}")
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn runtime_fault_from(adaptable: &crate::adaptable::Adaptable) -> RuntimeFault {
    let status = adaptable
        .payload
        .get("status")
        .and_then(|v| v.as_u64())
        .unwrap_or(500) as u16;
    let message = adaptable
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("subscription request failed")
        .to_string();
    let error_code = adaptable
        .payload
        .get("errorCode")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    RuntimeFault {
        status,
        message,
        error_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::TestProtocolAdapter;
    use crate::auth::NoopAuthProvider;
    use crate::config::ClientConfig;
    use crate::errors::ConnectError;
    use crate::transport::{Connector, FrameEvent, FrameSink, OutboundHeaders, Transport};
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool as StdAtomicBool, Ordering as StdOrdering};

    struct RecordingSink {
        sent: Arc<RwLock<Vec<String>>>,
    }

    impl FrameSink for RecordingSink {
        fn send_text(&self, text: String) {
            trace_write_lock!(self.sent).push(text);
        }
        fn disconnect(&self) {}
    }

    struct ImmediateAckTransport {
        connected: StdAtomicBool,
        sent: Arc<RwLock<Vec<String>>>,
        ack_tag: &'static str,
        fired: StdAtomicBool,
    }

    impl Transport for ImmediateAckTransport {
        fn poll(&mut self) -> Pin<Box<dyn std::future::Future<Output = FrameEvent> + Send + '_>> {
            Box::pin(async move {
                if !self.connected.swap(true, StdOrdering::SeqCst) {
                    return FrameEvent::Connected(Default::default());
                }
                loop {
                    if !trace_read_lock!(self.sent).is_empty() && !self.fired.swap(true, StdOrdering::SeqCst) {
                        return FrameEvent::Text(self.ack_tag.to_string());
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        }
    }

    struct AckConnector {
        sent: Arc<RwLock<Vec<String>>>,
        ack_tag: &'static str,
    }

    #[async_trait]
    impl Connector for AckConnector {
        async fn connect(
            &self,
            _endpoint: &url::Url,
            _headers: OutboundHeaders,
        ) -> Result<(Box<dyn Transport>, Arc<dyn FrameSink>), ConnectError> {
            Ok((
                Box::new(ImmediateAckTransport {
                    connected: StdAtomicBool::new(false),
                    sent: self.sent.clone(),
                    ack_tag: self.ack_tag,
                    fired: StdAtomicBool::new(false),
                }),
                Arc::new(RecordingSink {
                    sent: self.sent.clone(),
                }),
            ))
        }
    }

    async fn connected_engine(ack_tag: &'static str) -> (ConnectionEngine, Arc<RwLock<Vec<String>>>) {
        let sent = Arc::new(RwLock::new(Vec::new()));
        let adapter: Arc<dyn crate::adapter::ProtocolAdapter> = Arc::new(TestProtocolAdapter);
        let bus = AdaptableBus::new(adapter.clone());
        let engine = ConnectionEngine::new(
            ClientConfig::new("ws://example.invalid"),
            Arc::new(AckConnector {
                sent: sent.clone(),
                ack_tag,
            }),
            Arc::new(NoopAuthProvider::default()),
            adapter,
            bus,
        );
        engine.initialize().await.unwrap();
        (engine, sent)
    }

    #[tokio::test]
    async fn start_resolves_on_ack_and_marks_subscription_active() {
        let (engine, _sent) = connected_engine("START-SEND-EVENTS:ACK").await;
        let manager = SubscriptionManager::new();
        manager
            .start(
                &engine,
                "events",
                "START-SEND-EVENTS",
                "START-SEND-EVENTS:ACK",
                Vec::new(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(manager.is_active("events"));
    }

    #[tokio::test]
    async fn concurrent_start_calls_are_rejected() {
        let (engine, _sent) = connected_engine("START-SEND-EVENTS:ACK").await;
        let manager = SubscriptionManager::new();
        manager.inner.pending.store(true, Ordering::SeqCst);
        let result = manager
            .start(
                &engine,
                "events",
                "START-SEND-EVENTS",
                "START-SEND-EVENTS:ACK",
                Vec::new(),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(
            result,
            Err(RequestError::ClientState(ClientStateError::ConcurrentConsumptionRequest(_)))
        ));
    }

    #[tokio::test]
    async fn stop_on_inactive_subscription_completes_immediately() {
        let (engine, _sent) = connected_engine("STOP-SEND-EVENTS:ACK").await;
        let manager = SubscriptionManager::new();
        manager
            .stop(&engine, "events", "STOP-SEND-EVENTS", "STOP-SEND-EVENTS:ACK", Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[test]
    fn replay_entries_regenerates_correlation_id() {
        let manager = SubscriptionManager::new();
        trace_write_lock!(manager.inner.entries).insert(
            "events".to_string(),
            Entry {
                start_cmd: "START-SEND-EVENTS".to_string(),
                params: vec![("filter".to_string(), "eq(a,1)".to_string())],
            },
        );
        let entries = manager.replay_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("START-SEND-EVENTS?filter=eq"));
        assert!(entries[0].contains("correlation-id="));
    }
}
