//! End-to-end exercises of the assembled `Client` against a scripted
//! transport, one per scenario named in the testable-properties notes: a
//! gateway never actually runs, but every frame crossing the wire is
//! exactly what a real one would see.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use twinlink_client::adaptable::{Adaptable, Channel, Criterion, Group, TopicPath};
use twinlink_client::adapter::{ProtocolAdapter, Signal};
use twinlink_client::auth::NoopAuthProvider;
use twinlink_client::client::Client;
use twinlink_client::config::ClientConfig;
use twinlink_client::engine::state::ConnectionState;
use twinlink_client::engine::ZOMBIE_WINDOW;
use twinlink_client::errors::{ConnectError, ProtocolError, RequestError};
use twinlink_client::transport::{
    Connector, FrameEvent, FrameSink, OutboundHeaders, Transport,
};

/// A domain signal carrying an explicit entity id, used so the pointer-bus
/// scenarios can address a concrete thing rather than the fixed id the
/// crate's own unit-test adapter hands out.
#[derive(Debug, Clone)]
struct DomainSignal {
    kind: String,
    correlation_id: Option<String>,
    entity_id: String,
    payload: Value,
}

impl Signal for DomainSignal {
    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    fn type_name(&self) -> &str {
        &self.kind
    }
}

/// Shuttles signals as `{"type", "headers", "payload"}` envelopes and infers
/// a criterion from the action name's suffix, the same convention the wire
/// protocol's acknowledgement/error naming uses.
#[derive(Debug, Default)]
struct JsonEnvelopeAdapter;

impl ProtocolAdapter for JsonEnvelopeAdapter {
    fn to_adaptable(&self, signal: &dyn Signal) -> Result<Adaptable, ProtocolError> {
        let mut headers = HashMap::new();
        if let Some(id) = signal.correlation_id() {
            headers.insert("correlation-id".to_string(), id.to_string());
        }
        Ok(Adaptable {
            topic_path: TopicPath::new(
                Group::Things,
                Channel::Twin,
                "org.eclipse.ditto:sensor1",
                Criterion::Commands,
                signal.type_name(),
            ),
            headers,
            payload: Value::Null,
            extra: None,
        })
    }

    fn from_adaptable(&self, adaptable: &Adaptable) -> Result<Box<dyn Signal>, ProtocolError> {
        Ok(Box::new(DomainSignal {
            kind: adaptable.topic_path.action.clone(),
            correlation_id: adaptable.correlation_id().map(str::to_string),
            entity_id: adaptable.topic_path.entity_id.clone(),
            payload: adaptable.payload.clone(),
        }))
    }

    fn to_json_string(&self, adaptable: &Adaptable) -> Result<String, ProtocolError> {
        serde_json::to_string(&json!({
            "type": adaptable.topic_path.action,
            "headers": adaptable.headers,
        }))
        .map_err(|err| ProtocolError::ParseFailed(err.to_string()))
    }

    fn parse(&self, text: &str) -> Result<Adaptable, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| ProtocolError::ParseFailed(err.to_string()))?;
        let action = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::UnknownType)?
            .to_string();
        let headers: HashMap<String, String> = value
            .get("headers")
            .and_then(|h| serde_json::from_value(h.clone()).ok())
            .unwrap_or_default();
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        let entity_id = value
            .get("entityId")
            .and_then(Value::as_str)
            .unwrap_or("org.eclipse.ditto:sensor1")
            .to_string();
        let criterion = if action.ends_with("Response") {
            Criterion::Commands
        } else if action.ends_with("ErrorResponse") || action.ends_with("Error") {
            Criterion::Errors
        } else {
            Criterion::Events
        };
        Ok(Adaptable {
            topic_path: TopicPath::new(Group::Things, Channel::Twin, entity_id, criterion, action),
            headers,
            payload,
            extra: None,
        })
    }
}

struct RecordingSink {
    sent: Arc<StdMutex<Vec<String>>>,
}

impl FrameSink for RecordingSink {
    fn send_text(&self, text: String) {
        self.sent.lock().unwrap().push(text);
    }
    fn disconnect(&self) {}
}

/// One connect attempt's worth of scripted inbound frames, delivered in
/// order after the initial `Connected` event.
struct ScriptedTransport {
    connected: AtomicBool,
    inbound: StdMutex<tokio::sync::mpsc::UnboundedReceiver<FrameEvent>>,
}

impl Transport for ScriptedTransport {
    fn poll(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = FrameEvent> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.swap(true, Ordering::SeqCst) {
                return FrameEvent::Connected(Default::default());
            }
            match self.inbound.lock().unwrap().recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        })
    }
}

/// Hands out one scripted generation per `connect()` call, in order, so a
/// test can script a reconnect by queueing two generations up front.
struct ScriptedConnector {
    generations: StdMutex<VecDeque<tokio::sync::mpsc::UnboundedReceiver<FrameEvent>>>,
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _endpoint: &url::Url,
        _headers: OutboundHeaders,
    ) -> Result<(Box<dyn Transport>, Arc<dyn FrameSink>), ConnectError> {
        let inbound = self
            .generations
            .lock()
            .unwrap()
            .pop_front()
            .expect("scenario did not script enough connect generations");
        Ok((
            Box::new(ScriptedTransport {
                connected: AtomicBool::new(false),
                inbound: StdMutex::new(inbound),
            }),
            Arc::new(RecordingSink {
                sent: self.sent.clone(),
            }),
        ))
    }
}

/// Build a client wired to a connector that will answer `generation_count`
/// successive `connect()` calls, each fed by the returned senders in order.
fn harness(
    config: ClientConfig,
    generation_count: usize,
) -> (
    Client,
    Vec<tokio::sync::mpsc::UnboundedSender<FrameEvent>>,
    Arc<StdMutex<Vec<String>>>,
) {
    let mut generations = VecDeque::new();
    let mut senders = Vec::new();
    for _ in 0..generation_count {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        generations.push_back(rx);
        senders.push(tx);
    }
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let connector = Arc::new(ScriptedConnector {
        generations: StdMutex::new(generations),
        sent: sent.clone(),
    });
    let client = Client::new(
        config,
        connector,
        Arc::new(NoopAuthProvider::default()),
        Arc::new(JsonEnvelopeAdapter),
    );
    (client, senders, sent)
}

/// Pull `correlation-id` out of a `COMMAND?k=v&...` control string, the
/// wire format subscription start/stop commands use (as opposed to the
/// JSON-envelope requests, whose correlation id lives in `headers`).
fn query_correlation_id(command: &str) -> String {
    let query = command.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("correlation-id="))
        .expect("command carries no correlation-id")
        .to_string()
}

#[tokio::test]
async fn request_response_with_correlation() {
    let (client, senders, sent) = harness(ClientConfig::new("ws://gateway.invalid"), 1);
    client.initialize().await.unwrap();

    let signal = DomainSignal {
        kind: "RetrieveThing".to_string(),
        correlation_id: Some("c1".to_string()),
        entity_id: "org.eclipse.ditto:sensor1".to_string(),
        payload: Value::Null,
    };

    let events = senders[0].clone();
    let send = client.send_and_expect(
        &signal,
        false,
        None,
        "RetrieveThingResponse",
        "ThingErrorResponse",
        Some(Duration::from_secs(1)),
    );
    let reply = async {
        let response = json!({
            "type": "RetrieveThingResponse",
            "headers": {"correlation-id": "c1"},
            "payload": {"thingId": "org.eclipse.ditto:sensor1"},
        });
        events.send(FrameEvent::Text(response.to_string())).unwrap();
    };
    let (result, _) = tokio::join!(send, reply);
    let response = result.unwrap();
    assert_eq!(response.topic_path.action, "RetrieveThingResponse");
    let _ = sent;

    // The correlation entry was consumed; a second, unrelated reply for the
    // same id never arrives, so subscribing again against it simply times
    // out rather than resolving with stale state.
    let stale = client
        .engine()
        .bus()
        .subscribe_once_for_adaptable("c1", Duration::from_millis(20));
    assert!(stale.await.is_err());
}

#[tokio::test]
async fn streaming_subscription_start_and_replay_after_reconnect() {
    let (client, senders, sent) = harness(ClientConfig::new("ws://gateway.invalid"), 2);
    client.initialize().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    client
        .register_for_changes(
            "attr-handler",
            "/things/{thingId}/attributes",
            move |_change, captures| {
                assert_eq!(
                    captures.get("thingId").map(String::as_str),
                    Some("org.eclipse.ditto:sensor1")
                );
                seen_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    let start = client.start_consumption(
        "events",
        "START-SEND-EVENTS",
        "START-SEND-EVENTS:ACK",
        Vec::new(),
    );
    let ack = async {
        senders[0]
            .send(FrameEvent::Text("START-SEND-EVENTS:ACK".to_string()))
            .unwrap();
    };
    let (start_result, _) = tokio::join!(start, ack);
    start_result.unwrap();
    let first_correlation = {
        let sent = sent.lock().unwrap();
        let command = sent
            .iter()
            .rev()
            .find(|text| text.starts_with("START-SEND-EVENTS?"))
            .expect("start command was not sent");
        query_correlation_id(command)
    };

    // Drop the connection; the second scripted generation answers the
    // reconnect, after which the replayed start command must carry a fresh
    // correlation id.
    senders[0]
        .send(FrameEvent::Disconnected {
            server_frame: None,
            client_frame: None,
            closed_by_server: false,
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(client.state(), ConnectionState::Connected));

    let replayed = {
        let sent = sent.lock().unwrap();
        sent.iter()
            .rev()
            .find(|text| text.starts_with("START-SEND-EVENTS?"))
            .cloned()
            .expect("replay did not re-send the start command")
    };
    assert!(replayed.contains("correlation-id="));
    assert!(!replayed.contains(&first_correlation));

    senders[1]
        .send(FrameEvent::Text(
            json!({
                "type": "modified",
                "headers": {},
                "payload": {"path": "/attributes/temperature", "value": 21.5, "revision": 1},
            })
            .to_string(),
        ))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn protocol_error_surfaces_as_runtime_fault_without_a_change() {
    let (client, senders, _sent) = harness(ClientConfig::new("ws://gateway.invalid"), 1);
    client.initialize().await.unwrap();

    let changes_seen = Arc::new(AtomicUsize::new(0));
    let changes_seen_clone = changes_seen.clone();
    client
        .register_for_changes("h1", "/things/{thingId}", move |_, _| {
            changes_seen_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let signal = DomainSignal {
        kind: "DeleteThing".to_string(),
        correlation_id: Some("c2".to_string()),
        entity_id: "org.eclipse.ditto:sensor1".to_string(),
        payload: Value::Null,
    };

    let send = client.send_and_expect(
        &signal,
        false,
        None,
        "DeleteThingResponse",
        "ThingErrorResponse",
        Some(Duration::from_secs(1)),
    );
    let reply = async {
        let response = json!({
            "type": "ThingErrorResponse",
            "headers": {"correlation-id": "c2"},
            "payload": {"status": 404, "message": "thing not found"},
        });
        senders[0].send(FrameEvent::Text(response.to_string())).unwrap();
    };
    let (result, _) = tokio::join!(send, reply);
    match result {
        Err(RequestError::Runtime(fault)) => assert_eq!(fault.status, 404),
        other => panic!("expected a runtime fault, got {other:?}"),
    }
    assert_eq!(changes_seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn aggregated_ack_failure_reports_both_labels() {
    let (client, senders, _sent) = harness(ClientConfig::new("ws://gateway.invalid"), 1);
    client.initialize().await.unwrap();

    let signal = DomainSignal {
        kind: "ModifyThing".to_string(),
        correlation_id: Some("c3".to_string()),
        entity_id: "org.eclipse.ditto:sensor1".to_string(),
        payload: Value::Null,
    };

    let send = client.send_and_expect(
        &signal,
        false,
        Some("twin-persisted"),
        "ModifyThingResponse",
        "ThingErrorResponse",
        Some(Duration::from_secs(1)),
    );
    let reply = async {
        let response = json!({
            "type": "ModifyThingResponse",
            "headers": {"correlation-id": "c3"},
            "payload": {"acknowledgements": [
                {"label": "twin-persisted", "status": 204},
                {"label": "custom-ack", "status": 500},
            ]},
        });
        senders[0].send(FrameEvent::Text(response.to_string())).unwrap();
    };
    let (result, _) = tokio::join!(send, reply);
    match result {
        Err(RequestError::Protocol(ProtocolError::AcknowledgementsFailed(acks))) => {
            let labels: Vec<&str> = acks.iter().map(|entry| entry.label.as_str()).collect();
            assert!(labels.contains(&"twin-persisted"));
            assert!(labels.contains(&"custom-ack"));
        }
        other => panic!("expected an acknowledgements failure, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_disabled_enters_zombie_then_closes() {
    let mut config = ClientConfig::new("ws://gateway.invalid");
    config.reconnect_enabled = false;
    let (client, senders, _sent) = harness(config, 1);
    client.initialize().await.unwrap();

    senders[0]
        .send(FrameEvent::Disconnected {
            server_frame: None,
            client_frame: None,
            closed_by_server: true,
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(matches!(client.state(), ConnectionState::Zombie));

    tokio::time::sleep(ZOMBIE_WINDOW + Duration::from_millis(200)).await;
    assert!(matches!(client.state(), ConnectionState::Closed));
}

#[tokio::test]
async fn duplicate_registration_leaves_the_first_handler_functional() {
    let (client, senders, _sent) = harness(ClientConfig::new("ws://gateway.invalid"), 1);
    client.initialize().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    client
        .register_for_changes("h1", "/things/{thingId}/attributes", move |_, _| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let duplicate = client.register_for_changes("h1", "/things/{thingId}/attributes", |_, _| {});
    assert!(duplicate.is_err());

    senders[0]
        .send(FrameEvent::Text(
            json!({
                "type": "modified",
                "headers": {},
                "payload": {"path": "/attributes/temperature", "value": 1, "revision": 1},
            })
            .to_string(),
        ))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
