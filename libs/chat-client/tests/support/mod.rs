#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{any, post},
};
use gsm_chat_client::ChatEvent;
use serde_json::{Value, json};
use tokio::{
    net::TcpListener,
    sync::{Mutex, mpsc},
};

const WAIT: Duration = Duration::from_secs(5);

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Next event from the sink, failing the test after a few seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> ChatEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a chat event")
        .expect("sink closed")
}

/// Skips events until one matches.
pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<ChatEvent>, matches: F) -> ChatEvent
where
    F: Fn(&ChatEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

/// HTTP bot answering every POST with canned replies.
pub struct RestBot {
    pub requests: Mutex<Vec<RecordedRequest>>,
    replies: Mutex<Vec<(StatusCode, Value)>>,
}

impl RestBot {
    pub fn new(replies: Vec<(StatusCode, Value)>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies),
        })
    }

    pub async fn start(self: &Arc<Self>) -> String {
        let router = Router::new()
            .route("/webhooks/rest/webhook", post(rest_webhook))
            .with_state(Arc::clone(self));
        let addr = serve(router).await;
        format!("http://{addr}/webhooks/rest/webhook")
    }
}

async fn rest_webhook(
    State(bot): State<Arc<RestBot>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    bot.requests.lock().await.push(RecordedRequest {
        authorization: header(AUTHORIZATION.as_str()),
        content_type: header("content-type"),
        body,
    });

    let mut replies = bot.replies.lock().await;
    let (status, reply) = if replies.is_empty() {
        (StatusCode::OK, json!([]))
    } else {
        replies.remove(0)
    };
    (status, Json(reply)).into_response()
}

/// WebSocket bot speaking `{"event", "data"}` frames.
///
/// Echoes text, confirms sessions and hangs up when asked to via `/hangup`.
pub struct SocketBot {
    pub authorizations: Mutex<Vec<Option<String>>>,
    events: mpsc::UnboundedSender<(String, Value)>,
}

impl SocketBot {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Value)>) {
        let (events, rx) = mpsc::unbounded_channel();
        let bot = Arc::new(Self {
            authorizations: Mutex::new(Vec::new()),
            events,
        });
        (bot, rx)
    }

    pub async fn start(self: &Arc<Self>) -> String {
        let router = Router::new()
            .route("/socket", any(socket_upgrade))
            .with_state(Arc::clone(self));
        let addr = serve(router).await;
        format!("ws://{addr}/socket")
    }
}

async fn socket_upgrade(
    State(bot): State<Arc<SocketBot>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    bot.authorizations.lock().await.push(authorization);
    ws.on_upgrade(move |socket| run_socket(bot, socket))
}

async fn run_socket(bot: Arc<SocketBot>, mut socket: WebSocket) {
    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let event = frame["event"].as_str().unwrap_or_default().to_string();
        let data = frame["data"].clone();
        let _ = bot.events.send((event.clone(), data.clone()));

        match event.as_str() {
            "session_request" => {
                emit(&mut socket, "session_confirm", data).await;
            }
            "user_uttered" if data["message"] == "/hangup" => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            "user_uttered" => {
                let message = data["message"].as_str().unwrap_or_default();
                emit(&mut socket, "bot_typing", Value::Null).await;
                emit(
                    &mut socket,
                    "bot_uttered",
                    json!({"text": format!("echo: {message}")}),
                )
                .await;
            }
            "user_payload" => {
                emit(
                    &mut socket,
                    "bot_uttered",
                    json!({
                        "text": "Pick one",
                        "quick_replies": [
                            {"title": "Red", "payload": "/red"},
                            {"title": "Blue", "payload": "/blue"}
                        ]
                    }),
                )
                .await;
            }
            _ => {}
        }
    }
}

async fn emit(socket: &mut WebSocket, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    let _ = socket.send(Message::Text(frame.into())).await;
}
