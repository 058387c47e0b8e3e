//! The production [`super::Transport`]/[`super::Connector`] pair, backed by
//! `tokio-tungstenite`. The teacher's own transports speak a custom binary
//! framing over raw TCP rather than WebSocket, so this module's wire layer
//! is instead grounded on the WebSocket connect/split/forward pattern used
//! for upstream feeds elsewhere in the example pack (see DESIGN.md); the
//! polling contract and send-buffer shape follow the teacher's transport
//! directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, http::Request, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{ConnectedHeaders, Connector, FrameEvent, FrameSink, OutboundHeaders, Transport};
use crate::errors::ConnectError;

/// Largest text frame this transport will accept or send.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Ping cadence, equal to the connect timeout per the carrier configuration.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &url::Url,
        headers: OutboundHeaders,
    ) -> Result<(Box<dyn Transport>, Arc<dyn FrameSink>), ConnectError> {
        let mut builder = Request::builder().uri(endpoint.as_str());
        for (key, value) in headers.iter() {
            builder = builder.header(key.as_str(), value.as_str());
        }
        let request = builder
            .body(())
            .map_err(|err| ConnectError::ConnectFailed(err.to_string()))?;

        debug!("connecting to {}", endpoint);
        let (stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(classify_connect_error)?;

        let mut connected_headers = ConnectedHeaders::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                connected_headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let (transport, sink) = WsTransport::new(stream, connected_headers);
        Ok((Box::new(transport), Arc::new(sink) as Arc<dyn FrameSink>))
    }
}

fn classify_connect_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 {
                ConnectError::Auth(crate::errors::AuthError::Unauthorized)
            } else if status.as_u16() == 403 {
                ConnectError::Auth(crate::errors::AuthError::Forbidden)
            } else {
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned());
                ConnectError::HandshakeFailed {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or("unknown").to_string(),
                    body,
                }
            }
        }
        tungstenite::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::TimedOut => {
            ConnectError::Timeout
        }
        tungstenite::Error::Url(_) => ConnectError::UnknownHost(err.to_string()),
        other => ConnectError::ConnectFailed(other.to_string()),
    }
}

enum Outgoing {
    Text(String),
    Close,
}

/// Already-connected, poll-only half. Owned exclusively by the Connection
/// Engine's event loop.
pub struct WsTransport {
    read: Option<futures::stream::SplitStream<WsStream>>,
    connected_headers: Option<ConnectedHeaders>,
    disconnected: bool,
}

/// Cheap, cloneable write half. Funnels sends through an unbounded channel
/// to a dedicated write task, so `send_text` never blocks or contends with
/// the read loop.
#[derive(Clone)]
pub struct WsFrameSink {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl WsTransport {
    fn new(stream: WsStream, connected_headers: ConnectedHeaders) -> (Self, WsFrameSink) {
        let (mut write, read) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Outgoing>();

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let result = match message {
                    Outgoing::Text(text) => write.send(Message::Text(text.into())).await,
                    Outgoing::Close => write.send(Message::Close(None)).await,
                };
                if let Err(err) = result {
                    warn!("write side of frame transport failed: {err}");
                    break;
                }
            }
        });

        (
            Self {
                read: Some(read),
                connected_headers: Some(connected_headers),
                disconnected: false,
            },
            WsFrameSink { outgoing },
        )
    }
}

impl Transport for WsTransport {
    fn poll(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = FrameEvent> + Send + '_>> {
        Box::pin(async move {
            if let Some(headers) = self.connected_headers.take() {
                return FrameEvent::Connected(headers);
            }
            if self.disconnected {
                return FrameEvent::Disconnected {
                    server_frame: None,
                    client_frame: None,
                    closed_by_server: false,
                };
            }
            let Some(read) = self.read.as_mut() else {
                self.disconnected = true;
                return FrameEvent::Disconnected {
                    server_frame: None,
                    client_frame: None,
                    closed_by_server: false,
                };
            };
            match read.next().await {
                Some(Ok(Message::Text(text))) => FrameEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => FrameEvent::Binary(data.len()),
                Some(Ok(Message::Close(frame))) => {
                    self.disconnected = true;
                    FrameEvent::Disconnected {
                        server_frame: frame.map(describe_close_frame),
                        client_frame: None,
                        closed_by_server: true,
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    FrameEvent::Binary(0)
                }
                Some(Err(err)) => {
                    error!("frame transport read error: {err}");
                    self.disconnected = true;
                    FrameEvent::Error(ConnectError::Interrupted(err.to_string()))
                }
                None => {
                    self.disconnected = true;
                    FrameEvent::Disconnected {
                        server_frame: None,
                        client_frame: None,
                        closed_by_server: true,
                    }
                }
            }
        })
    }
}

impl FrameSink for WsFrameSink {
    fn send_text(&self, text: String) {
        if text.len() > MAX_PAYLOAD_BYTES {
            error!(
                "dropping outbound frame of {} bytes, exceeds maximum of {} bytes",
                text.len(),
                MAX_PAYLOAD_BYTES
            );
            return;
        }
        if self.outgoing.send(Outgoing::Text(text)).is_err() {
            error!("dropping outbound frame, transport write side is closed");
        }
    }

    fn disconnect(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

fn describe_close_frame(frame: CloseFrame) -> String {
    format!("{}: {}", frame.code, frame.reason)
}
