use std::{
    collections::VecDeque,
    sync::{Arc, Mutex as StdMutex},
    time::Instant,
};

use async_trait::async_trait;
use http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use metrics::{counter, histogram};
use reqwest::{Client, Url};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, warn};

use super::{Handlers, MessageHandler, StatusHandler, Transport, lock};
use crate::{
    config::{ClientConfig, TransportKind},
    error::TransportError,
    normalize::normalize,
    session::SharedSessionStore,
    telemetry,
    types::{InboundMessage, OutboundEnvelope, TransportStatus},
};

pub const FALLBACK_ERROR_TEXT: &str = "Error: Could not reach server.";
const MAX_ERROR_BODY: usize = 512;

/// One JSON POST against the bot endpoint.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<Value, TransportError>;
}

pub type SharedHttpBackend = Arc<dyn HttpBackend>;

#[derive(Clone, Default)]
pub struct ReqwestHttpBackend {
    client: Client,
}

impl ReqwestHttpBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpBackend for ReqwestHttpBackend {
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<Value, TransportError> {
        let url = Url::parse(url).map_err(|err| TransportError::Config(err.into()))?;
        let payload =
            serde_json::to_vec(body).map_err(|err| TransportError::Config(err.into()))?;
        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .body(payload)
            .send()
            .await
            .map_err(|err| TransportError::Transport(err.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".into());
            return Err(TransportError::Remote {
                status,
                message: truncate(body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| TransportError::Decode(err.into()))
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Request/response transport: every send is one POST whose reply carries
/// the bot messages for that turn.
#[derive(Clone)]
pub struct RequestResponseTransport {
    inner: Arc<RestInner>,
}

struct RestInner {
    endpoint: String,
    headers: HeaderMap,
    backend: SharedHttpBackend,
    session: SharedSessionStore,
    handlers: Handlers,
    /// Exchanges awaiting a reply; typing shows while any is outstanding.
    in_flight: StdMutex<usize>,
}

impl RequestResponseTransport {
    pub fn new(
        config: &ClientConfig,
        backend: SharedHttpBackend,
        session: SharedSessionStore,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(credential) = config.credential() {
            let value = HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|err| TransportError::Config(err.into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            inner: Arc::new(RestInner {
                endpoint: config.endpoint().to_string(),
                headers,
                backend,
                session,
                handlers: Handlers::default(),
                in_flight: StdMutex::new(0),
            }),
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Runs one exchange to completion. `send` spawns this.
    pub async fn exchange(&self, envelope: OutboundEnvelope) {
        Arc::clone(&self.inner).exchange(envelope).await
    }
}

impl RestInner {
    async fn exchange(self: Arc<Self>, envelope: OutboundEnvelope) {
        let span = telemetry::span_for_exchange(
            telemetry::redact_url(&self.endpoint),
            &envelope.sender_id,
        );
        async move {
            self.begin();

            let started = Instant::now();
            let result = self
                .backend
                .post_json(&self.endpoint, &self.headers, &envelope.wire_body())
                .await
                .and_then(replies);
            let outcome = if result.is_ok() { "ok" } else { "error" };
            histogram!("chat_exchange_seconds", "transport" => "rest", "outcome" => outcome)
                .record(started.elapsed().as_secs_f64());
            counter!("chat_exchanges_total", "transport" => "rest", "outcome" => outcome)
                .increment(1);

            self.finish();

            match result {
                Ok(replies) => {
                    debug!(count = replies.len(), "bot replied");
                    for raw in &replies {
                        self.handlers.deliver(normalize(raw));
                    }
                }
                Err(err) => {
                    counter!("chat_errors_total", "kind" => err.kind()).increment(1);
                    warn!(error = %err, kind = err.kind(), "chat exchange failed");
                    self.handlers
                        .deliver(InboundMessage::text(FALLBACK_ERROR_TEXT));
                }
            }

            self.session.touch();
        }
        .instrument(span)
        .await
    }
}

impl RestInner {
    fn begin(&self) {
        let mut in_flight = lock(&self.in_flight);
        *in_flight += 1;
        self.handlers.set_status(TransportStatus::TypingIndicator);
    }

    fn finish(&self) {
        let mut in_flight = lock(&self.in_flight);
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.handlers.set_status(TransportStatus::Idle);
        }
    }
}

fn replies(body: Value) -> Result<Vec<Value>, TransportError> {
    match body {
        Value::Array(items) => Ok(items),
        other => Err(TransportError::Decode(anyhow::anyhow!(
            "expected an array of bot messages, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Transport for RequestResponseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rest
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.handlers.add_message(handler);
    }

    fn on_status(&self, handler: StatusHandler) {
        self.inner.handlers.add_status(handler);
    }

    fn start(&self) {}

    fn stop(&self) {}

    fn send(&self, envelope: OutboundEnvelope) {
        tokio::spawn(Arc::clone(&self.inner).exchange(envelope));
    }

    fn status(&self) -> TransportStatus {
        self.inner.handlers.status()
    }
}

/// Records every request and answers from a queue of canned replies.
pub struct MockHttpBackend {
    pub requests: Mutex<Vec<(String, HeaderMap, Value)>>,
    replies: Mutex<VecDeque<Result<Value, TransportError>>>,
}

impl MockHttpBackend {
    pub fn new(replies: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        }
    }
}

impl Default for MockHttpBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl HttpBackend for MockHttpBackend {
    async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.requests
            .lock()
            .await
            .push((url.to_string(), headers.clone(), body.clone()));
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Value::Array(Vec::new())))
    }
}
