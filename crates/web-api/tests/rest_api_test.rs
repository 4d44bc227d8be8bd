mod support;

use std::time::Duration;

use application::RateLimitPolicy;
use config::AppConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use support::{next_event_named, Backend, TestServer};

#[tokio::test]
async fn test_health() {
    let backend = Backend::new();
    let server = TestServer::start(&backend).await;

    let response = reqwest::get(server.http_url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rest_message_uses_realtime_fan_out() {
    let backend = Backend::new();
    let server = TestServer::start(&backend).await;
    let alice = backend.principal("alice");
    let bob = backend.principal("bob");
    let conversation = backend.conversation_with(&[&alice, &bob]).await;
    let mut bob_ws = server.connect(&backend, &bob).await;

    let response = Client::new()
        .post(server.http_url("/api/v1/messages"))
        .bearer_auth(backend.token(&alice))
        .json(&json!({"conversation_id": conversation, "body": "sent over http"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();

    let event = next_event_named(&mut bob_ws, "message.new", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(event["payload"]["id"], created["id"]);
}

#[tokio::test]
async fn test_rest_requires_bearer_token() {
    let backend = Backend::new();
    let server = TestServer::start(&backend).await;

    let response = Client::new()
        .get(server.http_url("/api/v1/online-users"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_rest_send_errors_map_to_status_codes() {
    let backend = Backend::new();
    let server = TestServer::start_with(
        &backend,
        AppConfig::default().realtime,
        RateLimitPolicy::new(1, 0.001),
    )
    .await;
    let alice = backend.principal("alice");
    let conversation = backend.conversation_with(&[&alice]).await;
    let client = Client::new();
    let token = backend.token(&alice);

    let send = |body: &'static str, conversation| {
        client
            .post(server.http_url("/api/v1/messages"))
            .bearer_auth(&token)
            .json(&json!({"conversation_id": conversation, "body": body}))
            .send()
    };

    let empty = send("   ", conversation).await.unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let outsider = send("hi", domain::ConversationId::generate()).await.unwrap();
    assert_eq!(outsider.status(), StatusCode::FORBIDDEN);

    assert_eq!(send("one", conversation).await.unwrap().status(), StatusCode::CREATED);
    let limited = send("two", conversation).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = limited.json().await.unwrap();
    assert_eq!(body["code"], "rate_limited");
}

#[tokio::test]
async fn test_mark_read_publishes_receipt_to_members() {
    let backend = Backend::new();
    let server = TestServer::start(&backend).await;
    let alice = backend.principal("alice");
    let bob = backend.principal("bob");
    let conversation = backend.conversation_with(&[&alice, &bob]).await;
    let mut alice_ws = server.connect(&backend, &alice).await;
    let client = Client::new();

    let created: Value = client
        .post(server.http_url("/api/v1/messages"))
        .bearer_auth(backend.token(&alice))
        .json(&json!({"conversation_id": conversation, "body": "read me"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let message_id = created["id"].as_str().unwrap();

    let response = client
        .put(server.http_url(&format!("/api/v1/messages/{message_id}/read")))
        .bearer_auth(backend.token(&bob))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = next_event_named(&mut alice_ws, "message.read", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(receipt["payload"]["message_id"], message_id);
    assert_eq!(receipt["payload"]["user_id"], json!(bob.id));

    let missing = client
        .put(server.http_url(&format!(
            "/api/v1/messages/{}/read",
            domain::MessageId::generate()
        )))
        .bearer_auth(backend.token(&bob))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_online_users_and_presence_lookup() {
    let backend = Backend::new();
    let server = TestServer::start(&backend).await;
    let alice = backend.principal("alice");
    let bob = backend.principal("bob");
    let _alice_ws = server.connect(&backend, &alice).await;
    let client = Client::new();
    let token = backend.token(&bob);

    let online: Vec<Value> = client
        .get(server.http_url("/api/v1/online-users"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["id"], json!(alice.id));

    let presence: Value = client
        .get(server.http_url(&format!("/api/v1/users/{}/presence", alice.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(presence["online"], true);
    assert_eq!(presence["connected_here"], true);

    let unknown: Value = client
        .get(server.http_url(&format!("/api/v1/users/{}/presence", bob.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unknown["online"], false);
    assert_eq!(unknown["status"], "offline");
    assert!(unknown["last_seen"].is_null());
}
