//! Transports carrying envelopes to the bot and bot messages back.
//!
//! Both variants share one contract: `send` returns immediately and every
//! result, including failures the user should see, arrives through the
//! message handler.

pub mod connector;
pub mod duplex;
pub mod rest;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::counter;

use crate::{
    config::TransportKind,
    types::{InboundMessage, OutboundEnvelope, TransportStatus},
};

pub use connector::{
    ConnectOptions, DuplexChannel, DuplexConnector, MockConnector, MockPeer, SharedConnector,
    WireEvent, default_connector,
};
#[cfg(feature = "duplex")]
pub use connector::WebSocketConnector;
pub use duplex::{DuplexTransport, NOT_CONNECTED_NOTICE};
pub use rest::{
    FALLBACK_ERROR_TEXT, HttpBackend, MockHttpBackend, RequestResponseTransport,
    ReqwestHttpBackend, SharedHttpBackend,
};

pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;
pub type StatusHandler = Arc<dyn Fn(TransportStatus) + Send + Sync>;

pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn on_message(&self, handler: MessageHandler);
    fn on_status(&self, handler: StatusHandler);
    fn start(&self);
    fn stop(&self);
    /// Dispatches without waiting for the bot.
    fn send(&self, envelope: OutboundEnvelope);
    fn status(&self) -> TransportStatus;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Subscriber lists and the current status of a transport.
#[derive(Default)]
pub(crate) struct Handlers {
    messages: Mutex<Vec<MessageHandler>>,
    statuses: Mutex<Vec<StatusHandler>>,
    status: Mutex<TransportStatus>,
}

impl Handlers {
    pub(crate) fn add_message(&self, handler: MessageHandler) {
        lock(&self.messages).push(handler);
    }

    pub(crate) fn add_status(&self, handler: StatusHandler) {
        lock(&self.statuses).push(handler);
    }

    pub(crate) fn deliver(&self, message: InboundMessage) {
        counter!("chat_inbound_messages_total", "kind" => message.kind()).increment(1);
        let handlers = lock(&self.messages).clone();
        for handler in handlers {
            handler(message.clone());
        }
    }

    /// Notifies subscribers only when the status actually changes.
    pub(crate) fn set_status(&self, status: TransportStatus) {
        {
            let mut current = lock(&self.status);
            if *current == status {
                return;
            }
            *current = status;
        }
        let handlers = lock(&self.statuses).clone();
        for handler in handlers {
            handler(status);
        }
    }

    pub(crate) fn status(&self) -> TransportStatus {
        *lock(&self.status)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
