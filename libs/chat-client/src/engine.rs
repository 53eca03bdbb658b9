//! The chat engine glues session, transport and presentation together.
//!
//! The embedding application owns a [`ChatEngine`] and hands it a
//! [`ChatSink`]; everything the user should see arrives there as a
//! [`ChatEvent`].

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, Ordering},
};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    config::{ClientConfig, TransportKind},
    error::TransportError,
    session::{Session, SessionStore, SharedSessionStore},
    storage::{MemoryKeyValueStore, SharedKeyValueStore},
    transport::{
        DuplexTransport, RequestResponseTransport, ReqwestHttpBackend, SharedConnector,
        SharedHttpBackend, SharedTransport, Transport, default_connector, lock,
    },
    types::{ChoiceOption, InboundMessage, OutboundEnvelope, TransportStatus},
};

/// Render calls for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// The user's own bubble.
    Outbound { text: String },
    Message(InboundMessage),
    TypingStarted,
    TypingStopped,
    /// Connection banner; repeated statuses are folded.
    Status(TransportStatus),
    Visibility { open: bool },
}

pub trait ChatSink: Send + Sync {
    fn deliver(&self, event: ChatEvent);
}

pub type SharedSink = Arc<dyn ChatSink>;

/// Forwards events into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChatSink for ChannelSink {
    fn deliver(&self, event: ChatEvent) {
        // receiver gone means nobody renders anymore
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ChatEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl ChatSink for RecordingSink {
    fn deliver(&self, event: ChatEvent) {
        lock(&self.events).push(event);
    }
}

pub struct ChatEngineBuilder {
    config: ClientConfig,
    sink: SharedSink,
    storage: Option<SharedKeyValueStore>,
    backend: Option<SharedHttpBackend>,
    connector: Option<SharedConnector>,
}

impl ChatEngineBuilder {
    /// Durable storage for the session; defaults to an in-memory store.
    pub fn storage(mut self, storage: SharedKeyValueStore) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn http_backend(mut self, backend: SharedHttpBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn connector(mut self, connector: SharedConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds a duplex engine that cannot connect, as if compiled without a client.
    pub fn without_connector(mut self) -> Self {
        self.connector = None;
        self
    }

    /// Loads the session, starts the transport and sends the initial payload.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<ChatEngine, TransportError> {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryKeyValueStore::new()));
        let session: SharedSessionStore = Arc::new(SessionStore::open(
            storage,
            self.config.storage_key(),
            self.config.session_timeout(),
        ));

        let transport: SharedTransport = match self.config.transport() {
            TransportKind::Rest => {
                let backend = self
                    .backend
                    .unwrap_or_else(|| Arc::new(ReqwestHttpBackend::default()));
                Arc::new(RequestResponseTransport::new(
                    &self.config,
                    backend,
                    Arc::clone(&session),
                )?)
            }
            TransportKind::Duplex => Arc::new(DuplexTransport::new(
                &self.config,
                self.connector,
                Arc::clone(&session),
            )),
        };

        let view = Arc::new(ViewState {
            sink: self.sink,
            typing: AtomicBool::new(false),
            last_status: Mutex::new(transport.status()),
            open: AtomicBool::new(true),
            greeting: Mutex::new(
                self.config
                    .initial_payload()
                    .map(str::trim)
                    .filter(|payload| !payload.is_empty())
                    .map(str::to_string),
            ),
        });

        let sink_view = Arc::clone(&view);
        transport.on_message(Arc::new(move |message: InboundMessage| {
            sink_view.sink.deliver(ChatEvent::Message(message))
        }));
        let status_view = Arc::clone(&view);
        let weak_transport = Arc::downgrade(&transport);
        let weak_session = Arc::downgrade(&session);
        transport.on_status(Arc::new(move |status: TransportStatus| {
            status_view.on_status(status);
            if status == TransportStatus::Connected {
                send_greeting(&status_view, &weak_transport, &weak_session);
            }
        }));

        info!(
            transport = self.config.transport().as_str(),
            sender_id = %session.sender_id(),
            "chat engine ready"
        );

        let engine = ChatEngine {
            config: self.config,
            session,
            transport,
            view,
        };
        match engine.transport.kind() {
            TransportKind::Duplex => engine.transport.start(),
            TransportKind::Rest => {
                if let Some(payload) = engine.view.take_greeting() {
                    engine.dispatch(&payload, true);
                }
            }
        }
        Ok(engine)
    }
}

/// Presentation-side state shared with the transport callbacks.
struct ViewState {
    sink: SharedSink,
    typing: AtomicBool,
    last_status: Mutex<TransportStatus>,
    open: AtomicBool,
    greeting: Mutex<Option<String>>,
}

impl ViewState {
    fn on_status(&self, status: TransportStatus) {
        if status == TransportStatus::TypingIndicator {
            if !self.typing.swap(true, Ordering::SeqCst) {
                self.sink.deliver(ChatEvent::TypingStarted);
            }
            return;
        }
        if self.typing.swap(false, Ordering::SeqCst) {
            self.sink.deliver(ChatEvent::TypingStopped);
        }
        let changed = {
            let mut last = lock(&self.last_status);
            let changed = *last != status;
            *last = status;
            changed
        };
        if changed {
            self.sink.deliver(ChatEvent::Status(status));
        }
    }

    fn take_greeting(&self) -> Option<String> {
        lock(&self.greeting).take()
    }
}

fn send_greeting(
    view: &ViewState,
    transport: &Weak<dyn Transport>,
    session: &Weak<SessionStore>,
) {
    let (Some(transport), Some(session)) = (transport.upgrade(), session.upgrade()) else {
        return;
    };
    if let Some(payload) = view.take_greeting() {
        debug!("sending initial payload");
        transport.send(OutboundEnvelope::text(session.sender_id(), payload));
    }
}

/// An embeddable chat client bound to one bot endpoint.
///
/// Dropping the engine stops its transport.
pub struct ChatEngine {
    config: ClientConfig,
    session: SharedSessionStore,
    transport: SharedTransport,
    view: Arc<ViewState>,
}

impl ChatEngine {
    pub fn builder(config: ClientConfig, sink: SharedSink) -> ChatEngineBuilder {
        ChatEngineBuilder {
            config,
            sink,
            storage: None,
            backend: None,
            connector: default_connector(),
        }
    }

    /// Sends typed text. Blank input is ignored.
    pub fn send_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.dispatch(text, false);
    }

    /// Sends a structured payload without rendering anything.
    pub fn send_custom_payload(&self, data: Value) {
        let envelope = OutboundEnvelope::raw(self.session.sender_id(), data);
        self.transport.send(envelope);
    }

    /// Renders the option label and sends its payload as the message text.
    pub fn select_option(&self, option: &ChoiceOption) {
        self.view.sink.deliver(ChatEvent::Outbound {
            text: option.label.clone(),
        });
        self.transport
            .send(OutboundEnvelope::text(self.session.sender_id(), &option.payload));
    }

    pub fn open(&self) {
        self.set_open(true);
    }

    pub fn close(&self) {
        self.set_open(false);
    }

    pub fn is_open(&self) -> bool {
        self.view.open.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> TransportStatus {
        self.transport.status()
    }

    pub fn session(&self) -> Session {
        self.session.current()
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stops the transport, cancelling any pending reconnect.
    pub fn shutdown(&self) {
        self.transport.stop();
    }

    fn dispatch(&self, text: &str, silent: bool) {
        if !silent {
            self.view.sink.deliver(ChatEvent::Outbound {
                text: text.to_string(),
            });
        }
        self.transport
            .send(OutboundEnvelope::text(self.session.sender_id(), text));
    }

    fn set_open(&self, open: bool) {
        self.view.open.store(open, Ordering::SeqCst);
        self.view.sink.deliver(ChatEvent::Visibility { open });
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        self.transport.stop();
    }
}
