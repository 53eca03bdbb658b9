use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, info, warn};

use super::{
    Handlers, MessageHandler, StatusHandler, Transport,
    connector::{
        CONNECT_ERROR_EVENT, CONNECT_EVENT, ConnectOptions, DISCONNECT_EVENT, DuplexChannel,
        SharedConnector, WireEvent,
    },
    lock,
};
use crate::{
    config::{ClientConfig, EventNames, TransportKind},
    normalize::normalize,
    session::SharedSessionStore,
    telemetry,
    types::{InboundMessage, OutboundEnvelope, TransportStatus},
};

pub const NOT_CONNECTED_NOTICE: &str = "Not connected to server. Reconnecting...";

/// Persistent connection transport with a fixed-interval reconnect policy.
///
/// At most one reconnect timer is outstanding at any time and retries never
/// give up; [`Transport::stop`] is the only way to end them.
#[derive(Clone)]
pub struct DuplexTransport {
    inner: Arc<DuplexInner>,
}

struct DuplexInner {
    url: String,
    options: ConnectOptions,
    events: EventNames,
    reconnect_interval: Duration,
    connector: Option<SharedConnector>,
    session: SharedSessionStore,
    handlers: Handlers,
    link: Mutex<LinkState>,
    missing_connector_logged: AtomicBool,
}

#[derive(Default)]
struct LinkState {
    link: Link,
    /// Bumped on every attempt and on stop so stale tasks can tell they are stale.
    generation: u64,
    stopped: bool,
    connection: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

#[derive(Default)]
enum Link {
    #[default]
    Down,
    Connecting,
    Open(mpsc::UnboundedSender<WireEvent>),
}

impl DuplexTransport {
    /// `connector` is `None` when no duplex client is available in this build.
    pub fn new(
        config: &ClientConfig,
        connector: Option<SharedConnector>,
        session: SharedSessionStore,
    ) -> Self {
        Self {
            inner: Arc::new(DuplexInner {
                url: config.endpoint().to_string(),
                options: ConnectOptions {
                    credential: config.credential().map(|c| c.to_string()),
                },
                events: config.events().clone(),
                reconnect_interval: config.reconnect_interval(),
                connector,
                session,
                handlers: Handlers::default(),
                link: Mutex::new(LinkState::default()),
                missing_connector_logged: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(lock(&self.inner.link).link, Link::Open(_))
    }

    /// Arms the reconnect timer. Returns `false` when one is already pending
    /// or the transport cannot reconnect at all.
    pub fn schedule_reconnect(&self) -> bool {
        self.inner.schedule_reconnect()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        lock(&self.inner.link).reconnect.is_some()
    }
}

impl DuplexInner {
    fn connect(self: &Arc<Self>) {
        let Some(connector) = self.connector.clone() else {
            if !self.missing_connector_logged.swap(true, Ordering::SeqCst) {
                warn!(
                    url = %telemetry::redact_url(&self.url),
                    "duplex client unavailable in this build; transport stays idle"
                );
            }
            return;
        };

        let mut state = lock(&self.link);
        if state.stopped || !matches!(state.link, Link::Down) {
            return;
        }
        state.link = Link::Connecting;
        state.generation += 1;
        let generation = state.generation;
        let inner = Arc::clone(self);
        state.connection = Some(tokio::spawn(async move {
            inner.run_connection(connector, generation).await;
        }));
    }

    async fn run_connection(self: Arc<Self>, connector: SharedConnector, generation: u64) {
        let sender_id = self.session.sender_id();
        let span =
            telemetry::span_for_connection(telemetry::redact_url(&self.url), &sender_id, generation);
        async move {
            self.handlers.set_status(TransportStatus::Connecting);

            let DuplexChannel {
                outgoing,
                mut incoming,
            } = match connector.connect(&self.url, &self.options).await {
                Ok(channel) => channel,
                Err(err) => {
                    counter!("chat_errors_total", "kind" => err.kind()).increment(1);
                    warn!(error = %err, "duplex connection failed");
                    self.connection_lost(generation);
                    return;
                }
            };

            let handshake = WireEvent::new(
                self.events.session_request.clone(),
                json!({ "session_id": sender_id }),
            );
            if outgoing.send(handshake).is_err() {
                self.connection_lost(generation);
                return;
            }

            {
                let mut state = lock(&self.link);
                if state.stopped || state.generation != generation {
                    return;
                }
                state.link = Link::Open(outgoing);
            }
            info!("duplex connection established");
            self.handlers.set_status(TransportStatus::Connected);

            while let Some(event) = incoming.recv().await {
                if !self.handle_event(event) {
                    break;
                }
            }
            self.connection_lost(generation);
        }
        .instrument(span)
        .await
    }

    /// Returns `false` once the connection reported its end.
    fn handle_event(&self, event: WireEvent) -> bool {
        let name = event.event.as_str();
        if name == self.events.bot_message {
            let message = normalize(&event.data);
            if self.handlers.status() == TransportStatus::TypingIndicator {
                self.handlers.set_status(TransportStatus::Connected);
            }
            self.handlers.deliver(message);
            self.session.touch();
            return true;
        }
        if name == self.events.bot_typing {
            self.handlers.set_status(TransportStatus::TypingIndicator);
            return true;
        }
        if name == self.events.session_confirm {
            debug!(data = %event.data, "session confirmed by bot");
            return true;
        }
        match name {
            CONNECT_EVENT => true,
            DISCONNECT_EVENT | CONNECT_ERROR_EVENT => {
                info!(event = name, data = %event.data, "duplex connection ended");
                false
            }
            other => {
                debug!(event = other, "ignoring unknown duplex event");
                true
            }
        }
    }

    fn connection_lost(self: &Arc<Self>, generation: u64) {
        {
            let mut state = lock(&self.link);
            if state.stopped || state.generation != generation {
                return;
            }
            state.link = Link::Down;
            state.connection = None;
        }
        self.handlers.set_status(TransportStatus::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) -> bool {
        if self.connector.is_none() {
            return false;
        }
        let mut state = lock(&self.link);
        if state.stopped {
            return false;
        }
        if state.reconnect.is_some() {
            debug!("reconnect already pending");
            return false;
        }

        let inner = Arc::clone(self);
        let interval = self.reconnect_interval;
        // measured from now, not from whenever the timer task is first polled
        let deadline = tokio::time::Instant::now() + interval;
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            lock(&inner.link).reconnect = None;
            counter!("chat_reconnects_total").increment(1);
            info!(after = ?interval, "reconnecting duplex transport");
            inner.connect();
        }));
        debug!(interval = ?interval, "reconnect scheduled");
        true
    }

    fn not_connected(self: &Arc<Self>) {
        counter!("chat_errors_total", "kind" => "not_connected").increment(1);
        warn!("duplex transport not connected; message not sent");
        self.handlers.deliver(InboundMessage::text(NOT_CONNECTED_NOTICE));
        self.schedule_reconnect();
    }
}

impl Transport for DuplexTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.handlers.add_message(handler);
    }

    fn on_status(&self, handler: StatusHandler) {
        self.inner.handlers.add_status(handler);
    }

    fn start(&self) {
        lock(&self.inner.link).stopped = false;
        self.inner.connect();
    }

    fn stop(&self) {
        {
            let mut state = lock(&self.inner.link);
            state.stopped = true;
            state.generation += 1;
            state.link = Link::Down;
            if let Some(handle) = state.connection.take() {
                handle.abort();
            }
            if let Some(handle) = state.reconnect.take() {
                handle.abort();
            }
        }
        self.inner.handlers.set_status(TransportStatus::Idle);
    }

    fn send(&self, envelope: OutboundEnvelope) {
        let outgoing = match &lock(&self.inner.link).link {
            Link::Open(outgoing) => Some(outgoing.clone()),
            _ => None,
        };
        let Some(outgoing) = outgoing else {
            self.inner.not_connected();
            return;
        };

        let events = &self.inner.events;
        let name = if envelope.is_payload() {
            &events.user_payload
        } else {
            &events.user_text
        };
        if outgoing
            .send(WireEvent::new(name.clone(), envelope.wire_body()))
            .is_err()
        {
            self.inner.not_connected();
        }
    }

    fn status(&self) -> TransportStatus {
        self.inner.handlers.status()
    }
}
