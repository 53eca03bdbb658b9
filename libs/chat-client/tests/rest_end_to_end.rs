use std::sync::Arc;

use axum::http::StatusCode;
use gsm_chat_client::{
    ChannelSink, ChatEngine, ChatEvent, ChoiceOption, ClientConfig, FileKeyValueStore,
    InboundMessage, KeyValueStore, TransportKind, TransportStatus, transport::FALLBACK_ERROR_TEXT,
};
use serde_json::json;

mod support;

use support::{RestBot, next_event};

#[tokio::test]
async fn send_text_round_trips_through_http_bot() {
    let bot = RestBot::new(vec![(StatusCode::OK, json!([{"text": "hi"}]))]);
    let endpoint = bot.start().await;
    let config = ClientConfig::builder(TransportKind::Rest, endpoint)
        .credential("test-token")
        .build();
    let (sink, mut events) = ChannelSink::new();
    let engine = ChatEngine::builder(config, Arc::new(sink)).build().unwrap();

    engine.send_text("hello");

    assert_eq!(
        next_event(&mut events).await,
        ChatEvent::Outbound {
            text: "hello".into()
        }
    );
    assert_eq!(next_event(&mut events).await, ChatEvent::TypingStarted);
    assert_eq!(next_event(&mut events).await, ChatEvent::TypingStopped);
    assert_eq!(
        next_event(&mut events).await,
        ChatEvent::Message(InboundMessage::text("hi"))
    );
    assert!(events.try_recv().is_err());

    let requests = bot.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(requests[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(
        requests[0].body,
        json!({"message": "hello", "sender": engine.session().sender_id})
    );
    assert_eq!(engine.status(), TransportStatus::Idle);
}

#[tokio::test]
async fn replies_are_delivered_in_backend_order() {
    let bot = RestBot::new(vec![(
        StatusCode::OK,
        json!([
            {"text": "first"},
            {"image": "http://img.test/cat.png"},
            {"text": "which?", "quick_replies": [{"title": "Yes", "payload": "/yes"}]},
            {"custom": {"chart": [1, 2, 3]}}
        ]),
    )]);
    let endpoint = bot.start().await;
    let (sink, mut events) = ChannelSink::new();
    let engine = ChatEngine::builder(
        ClientConfig::builder(TransportKind::Rest, endpoint).build(),
        Arc::new(sink),
    )
    .build()
    .unwrap();

    engine.send_text("show me");
    let mut messages = Vec::new();
    while messages.len() < 4 {
        if let ChatEvent::Message(message) = next_event(&mut events).await {
            messages.push(message);
        }
    }

    assert_eq!(
        messages,
        vec![
            InboundMessage::text("first"),
            InboundMessage::Composite {
                text: None,
                image: Some("http://img.test/cat.png".into()),
                options: None,
                data: None,
            },
            InboundMessage::Choice {
                prompt: Some("which?".into()),
                options: vec![ChoiceOption::new("Yes", "/yes")],
            },
            InboundMessage::Composite {
                text: None,
                image: None,
                options: None,
                data: Some(json!({"chart": [1, 2, 3]})),
            },
        ]
    );
}

#[tokio::test]
async fn server_error_renders_single_fallback() {
    let bot = RestBot::new(vec![(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"error": "boom"}),
    )]);
    let endpoint = bot.start().await;
    let (sink, mut events) = ChannelSink::new();
    let engine = ChatEngine::builder(
        ClientConfig::builder(TransportKind::Rest, endpoint).build(),
        Arc::new(sink),
    )
    .build()
    .unwrap();

    engine.send_text("hello");

    assert!(matches!(
        next_event(&mut events).await,
        ChatEvent::Outbound { .. }
    ));
    assert_eq!(next_event(&mut events).await, ChatEvent::TypingStarted);
    assert_eq!(next_event(&mut events).await, ChatEvent::TypingStopped);
    assert_eq!(
        next_event(&mut events).await,
        ChatEvent::Message(InboundMessage::text(FALLBACK_ERROR_TEXT))
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_endpoint_renders_fallback() {
    // bind then drop so nothing listens on the port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (sink, mut events) = ChannelSink::new();
    let engine = ChatEngine::builder(
        ClientConfig::builder(TransportKind::Rest, format!("http://{addr}/hook")).build(),
        Arc::new(sink),
    )
    .build()
    .unwrap();

    engine.send_text("anyone there?");

    let fallback = support::wait_for(&mut events, |event| {
        matches!(event, ChatEvent::Message(_))
    })
    .await;
    assert_eq!(
        fallback,
        ChatEvent::Message(InboundMessage::text(FALLBACK_ERROR_TEXT))
    );
}

#[tokio::test]
async fn file_backed_session_is_reused_across_engines() {
    let bot = RestBot::new(Vec::new());
    let endpoint = bot.start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig::builder(TransportKind::Rest, endpoint)
        .storage_key("kiosk/session")
        .build();

    let storage = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
    let (sink, _events) = ChannelSink::new();
    let first = ChatEngine::builder(config.clone(), Arc::new(sink))
        .storage(storage.clone())
        .build()
        .unwrap();
    let sender_id = first.session().sender_id;
    drop(first);

    let reopened = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
    let stored = reopened.get("kiosk/session").unwrap().unwrap();
    assert!(stored.contains(&sender_id));

    let (sink, mut events) = ChannelSink::new();
    let second = ChatEngine::builder(config, Arc::new(sink))
        .storage(reopened)
        .build()
        .unwrap();
    assert_eq!(second.session().sender_id, sender_id);

    second.send_text("still me");
    support::wait_for(&mut events, |event| *event == ChatEvent::TypingStopped).await;
    assert_eq!(bot.requests.lock().await[0].body["sender"], sender_id);
}
