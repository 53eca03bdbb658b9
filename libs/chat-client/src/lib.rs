//! Embeddable chat client for conversational bot backends.
//!
//! A [`ChatEngine`] keeps a persisted [`Session`], talks to the bot through a
//! [`Transport`] (one POST per turn, or a persistent duplex connection) and
//! hands every bot reply to the presentation layer as a normalized
//! [`InboundMessage`].

#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::{ClientConfig, ClientConfigBuilder, EventNames, TransportKind};
pub use engine::{
    ChannelSink, ChatEngine, ChatEngineBuilder, ChatEvent, ChatSink, RecordingSink, SharedSink,
};
pub use error::{ConfigError, StorageError, TransportError};
pub use normalize::normalize;
pub use session::{Session, SessionStore, SharedSessionStore};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, SharedKeyValueStore};
pub use transport::{DuplexTransport, RequestResponseTransport, SharedTransport, Transport};
pub use types::{ChoiceOption, InboundMessage, OutboundEnvelope, TransportStatus};
