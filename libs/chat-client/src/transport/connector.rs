use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::lock;
use crate::error::TransportError;

pub const CONNECT_EVENT: &str = "connect";
pub const DISCONNECT_EVENT: &str = "disconnect";
pub const CONNECT_ERROR_EVENT: &str = "connect_error";

/// A named event on the duplex wire, framed as `{"event": .., "data": ..}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WireEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub credential: Option<String>,
}

/// Both halves of an open duplex connection.
///
/// Dropping `outgoing` closes the connection. `incoming` ends after a
/// lifecycle event once the peer goes away.
pub struct DuplexChannel {
    pub outgoing: mpsc::UnboundedSender<WireEvent>,
    pub incoming: mpsc::UnboundedReceiver<WireEvent>,
}

#[async_trait]
pub trait DuplexConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<DuplexChannel, TransportError>;
}

pub type SharedConnector = Arc<dyn DuplexConnector>;

/// The connector compiled into this build, if any.
pub fn default_connector() -> Option<SharedConnector> {
    #[cfg(feature = "duplex")]
    {
        Some(Arc::new(WebSocketConnector))
    }
    #[cfg(not(feature = "duplex"))]
    {
        None
    }
}

#[cfg(feature = "duplex")]
pub use websocket::WebSocketConnector;

#[cfg(feature = "duplex")]
mod websocket {
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use http::{HeaderValue, header::AUTHORIZATION};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::{
        connect_async,
        tungstenite::{Message, client::IntoClientRequest},
    };
    use tracing::{debug, warn};

    use super::{ConnectOptions, DISCONNECT_EVENT, DuplexChannel, DuplexConnector, WireEvent};
    use crate::error::TransportError;

    /// Named events as JSON text frames over a WebSocket.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct WebSocketConnector;

    #[async_trait]
    impl DuplexConnector for WebSocketConnector {
        async fn connect(
            &self,
            url: &str,
            options: &ConnectOptions,
        ) -> Result<DuplexChannel, TransportError> {
            let mut request = url
                .into_client_request()
                .map_err(|err| TransportError::Config(err.into()))?;
            if let Some(credential) = options.credential.as_deref() {
                let value = HeaderValue::from_str(&format!("Bearer {credential}"))
                    .map_err(|err| TransportError::Config(err.into()))?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }

            let (socket, _) = connect_async(request)
                .await
                .map_err(|err| TransportError::Connect(err.into()))?;
            let (mut sink, mut stream) = socket.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireEvent>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<WireEvent>();

            tokio::spawn(async move {
                while let Some(event) = out_rx.recv().await {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(error = %err, event = %event.event, "dropping unencodable event");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::text(frame)).await {
                        debug!(error = %err, "websocket write failed");
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                let reason = loop {
                    match stream.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<WireEvent>(text.as_str()) {
                                Ok(event) => {
                                    if in_tx.send(event).is_err() {
                                        return;
                                    }
                                }
                                Err(err) => debug!(error = %err, "ignoring malformed frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) => break "closed by peer".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break err.to_string(),
                        None => break "stream ended".to_string(),
                    }
                };
                let _ = in_tx.send(WireEvent::new(DISCONNECT_EVENT, json!({"reason": reason})));
            });

            Ok(DuplexChannel {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }
}

/// Test side of a [`MockConnector`] connection.
pub struct MockPeer {
    /// Events the client emitted.
    pub sent: mpsc::UnboundedReceiver<WireEvent>,
    /// Pushes events to the client; dropping it disconnects.
    pub push: mpsc::UnboundedSender<WireEvent>,
}

/// In-process connector; every accepted connection hands a [`MockPeer`] to the test.
pub struct MockConnector {
    accept: AtomicBool,
    attempts: AtomicUsize,
    urls: std::sync::Mutex<Vec<(String, Option<String>)>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accept: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            urls: std::sync::Mutex::new(Vec::new()),
            peers,
        });
        (connector, rx)
    }

    pub fn set_accepting(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// `(url, credential)` of every attempt.
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        lock(&self.urls).clone()
    }
}

#[async_trait]
impl DuplexConnector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<DuplexChannel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.urls).push((url.to_string(), options.credential.clone()));
        if !self.accept.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(anyhow::anyhow!("connection refused")));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        // A test that dropped its peer receiver simply never sees this connection.
        let _ = self.peers.send(MockPeer {
            sent: out_rx,
            push: in_tx,
        });
        Ok(DuplexChannel {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
