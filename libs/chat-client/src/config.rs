use std::{env, fmt, str::FromStr, time::Duration};

use crate::error::ConfigError;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_STORAGE_KEY: &str = "chat_session";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Rest,
    Duplex,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Rest => "rest",
            TransportKind::Duplex => "duplex",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rest" | "http" => Ok(TransportKind::Rest),
            "duplex" | "socket" | "ws" | "websocket" => Ok(TransportKind::Duplex),
            other => Err(ConfigError::Invalid {
                name: "transport",
                reason: format!("unknown transport `{other}`"),
            }),
        }
    }
}

/// Event names used on the duplex wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventNames {
    pub session_request: String,
    pub session_confirm: String,
    pub user_text: String,
    pub user_payload: String,
    pub bot_message: String,
    pub bot_typing: String,
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            session_request: "session_request".into(),
            session_confirm: "session_confirm".into(),
            user_text: "user_uttered".into(),
            user_payload: "user_payload".into(),
            bot_message: "bot_uttered".into(),
            bot_typing: "bot_typing".into(),
        }
    }
}

/// Client settings. Immutable once the engine is built.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    transport: TransportKind,
    endpoint: String,
    credential: Option<String>,
    session_timeout: Duration,
    reconnect_interval: Duration,
    storage_key: String,
    initial_payload: Option<String>,
    events: EventNames,
}

impl ClientConfig {
    pub fn builder(transport: TransportKind, endpoint: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                transport,
                endpoint: endpoint.into(),
                credential: None,
                session_timeout: DEFAULT_SESSION_TIMEOUT,
                reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
                storage_key: DEFAULT_STORAGE_KEY.into(),
                initial_payload: None,
                events: EventNames::default(),
            },
        }
    }

    /// Reads `CHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let endpoint = read("CHAT_ENDPOINT").ok_or(ConfigError::Missing("CHAT_ENDPOINT"))?;
        let transport = match read("CHAT_TRANSPORT") {
            Some(value) => value.parse()?,
            None => TransportKind::default(),
        };

        let mut builder = ClientConfig::builder(transport, endpoint);
        if let Some(credential) = read("CHAT_CREDENTIAL") {
            builder = builder.credential(credential);
        }
        if let Some(secs) = read("CHAT_SESSION_TIMEOUT_SECS") {
            builder = builder.session_timeout(Duration::from_secs(parse_u64(
                "CHAT_SESSION_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(ms) = read("CHAT_RECONNECT_INTERVAL_MS") {
            builder = builder.reconnect_interval(Duration::from_millis(parse_u64(
                "CHAT_RECONNECT_INTERVAL_MS",
                &ms,
            )?));
        }
        if let Some(key) = read("CHAT_STORAGE_KEY") {
            builder = builder.storage_key(key);
        }
        if let Some(payload) = read("CHAT_INITIAL_PAYLOAD") {
            builder = builder.initial_payload(payload);
        }

        let mut events = EventNames::default();
        let overrides: [(&str, &mut String); 6] = [
            ("CHAT_EVENT_SESSION_REQUEST", &mut events.session_request),
            ("CHAT_EVENT_SESSION_CONFIRM", &mut events.session_confirm),
            ("CHAT_EVENT_USER_TEXT", &mut events.user_text),
            ("CHAT_EVENT_USER_PAYLOAD", &mut events.user_payload),
            ("CHAT_EVENT_BOT_MESSAGE", &mut events.bot_message),
            ("CHAT_EVENT_BOT_TYPING", &mut events.bot_typing),
        ];
        for (name, slot) in overrides {
            if let Some(value) = read(name) {
                *slot = value;
            }
        }

        Ok(builder.events(events).build())
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn initial_payload(&self) -> Option<&str> {
        self.initial_payload.as_deref()
    }

    pub fn events(&self) -> &EventNames {
        &self.events
    }
}

pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn credential(mut self, credential: impl Into<String>) -> Self {
        self.config.credential = Some(credential.into());
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.config.storage_key = key.into();
        self
    }

    /// Payload sent silently once at startup, usually a greeting intent.
    pub fn initial_payload(mut self, payload: impl Into<String>) -> Self {
        self.config.initial_payload = Some(payload.into());
        self
    }

    pub fn events(mut self, events: EventNames) -> Self {
        self.config.events = events;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn builder_defaults() {
        let config = ClientConfig::builder(TransportKind::Rest, "http://bot.test/webhook").build();
        assert_eq!(config.transport(), TransportKind::Rest);
        assert_eq!(config.endpoint(), "http://bot.test/webhook");
        assert_eq!(config.credential(), None);
        assert_eq!(config.session_timeout(), DEFAULT_SESSION_TIMEOUT);
        assert_eq!(config.reconnect_interval(), DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(config.storage_key(), DEFAULT_STORAGE_KEY);
        assert_eq!(config.events(), &EventNames::default());
    }

    #[test]
    fn env_requires_endpoint() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CHAT_ENDPOINT")));
    }

    #[test]
    fn env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CHAT_ENDPOINT", "ws://bot.test/socket"),
            ("CHAT_TRANSPORT", "duplex"),
            ("CHAT_CREDENTIAL", "secret"),
            ("CHAT_SESSION_TIMEOUT_SECS", "60"),
            ("CHAT_RECONNECT_INTERVAL_MS", "250"),
            ("CHAT_STORAGE_KEY", "acme_chat"),
            ("CHAT_INITIAL_PAYLOAD", "/greet"),
            ("CHAT_EVENT_BOT_MESSAGE", "bot_message"),
        ]))
        .unwrap();
        assert_eq!(config.transport(), TransportKind::Duplex);
        assert_eq!(config.credential(), Some("secret"));
        assert_eq!(config.session_timeout(), Duration::from_secs(60));
        assert_eq!(config.reconnect_interval(), Duration::from_millis(250));
        assert_eq!(config.storage_key(), "acme_chat");
        assert_eq!(config.initial_payload(), Some("/greet"));
        assert_eq!(config.events().bot_message, "bot_message");
        assert_eq!(config.events().user_text, "user_uttered");
    }

    #[test]
    fn env_rejects_bad_numbers_and_transports() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("CHAT_ENDPOINT", "http://bot.test"),
            ("CHAT_RECONNECT_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "CHAT_RECONNECT_INTERVAL_MS",
                ..
            }
        ));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
        assert_eq!("WS".parse::<TransportKind>().unwrap(), TransportKind::Duplex);
    }
}
