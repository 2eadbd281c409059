use std::sync::Arc;

use chrono::{Duration, Utc};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::Value;

use hivesite::chat::ChatResponder;
use hivesite::ingestion::{build_http_client, Aggregator};
use hivesite::llm::remote::RemoteLlmProvider;
use hivesite::models::{
    ChatMessage, ContentUpdate, Conversation, Feedback, NewContentUpdate, NewConversation,
    NewFeedback, NewsletterSubscription, Role, Source, UpdateKind,
};
use hivesite::scheduler::AutoFetcher;
use hivesite::server::{build_rocket, AppState};
use hivesite::storage::{MemoryStore, Store, StoreError, StoreResult};

const COMPLETION: &str = r#"{
    "model": "llama-3.3-70b-versatile",
    "choices": [{"message": {"role": "assistant", "content": "Gensyn is a compute protocol."}}]
}"#;

fn responder_for(url: String, store: Arc<dyn Store>) -> Arc<ChatResponder> {
    let provider = Arc::new(RemoteLlmProvider::new(url, "test-key", "llama-3.3-70b-versatile"));
    Arc::new(ChatResponder::new(provider, store))
}

async fn client_with(store: Arc<dyn Store>, responder: Option<Arc<ChatResponder>>) -> Client {
    let aggregator = Aggregator::new(Arc::clone(&store), Vec::new(), build_http_client(5).unwrap());
    let fetcher = Arc::new(AutoFetcher::new(Arc::new(aggregator)));
    let state = AppState::new(store, responder, fetcher, "GROQ_API_KEY");
    let figment = rocket::Config::figment().merge(("log_level", "off"));
    Client::tracked(build_rocket(state, figment)).await.expect("valid rocket instance")
}

async fn post_json(client: &Client, uri: &'static str, body: &str) -> (Status, Value) {
    let response = client
        .post(uri)
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    let status = response.status();
    let json = response.into_json::<Value>().await.unwrap_or(Value::Null);
    (status, json)
}

async fn get_json(client: &Client, uri: &str) -> (Status, Value) {
    let response = client.get(uri).dispatch().await;
    let status = response.status();
    let json = response.into_json::<Value>().await.unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_chat_rejects_invalid_message_without_upstream_call() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server.mock("POST", "/").expect(0).create_async().await;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let client = client_with(Arc::clone(&store), Some(responder_for(server.url(), Arc::clone(&store)))).await;

    for body in [r#"{"message": ""}"#, r#"{"message": 123}"#, r#"{"sessionId": "s"}"#] {
        let (status, json) = post_json(&client, "/api/chat", body).await;
        assert_eq!(status, Status::BadRequest, "{}", body);
        assert_eq!(json["error"], "Message is required");
    }

    let (status, _) = post_json(&client, "/api/chat", r#"{"message": "hi", "history": "nope"}"#).await;
    assert_eq!(status, Status::BadRequest);

    upstream.assert_async().await;
}

#[tokio::test]
async fn test_chat_without_credential_reports_configuration_error() {
    let client = client_with(Arc::new(MemoryStore::new()), None).await;

    let (status, json) = post_json(&client, "/api/chat", r#"{"message": "What is Gensyn?"}"#).await;
    assert_eq!(status, Status::InternalServerError);
    assert_eq!(json["error"], "Server configuration error");
    assert!(json["hint"].as_str().unwrap().contains("GROQ_API_KEY"));

    // validation still comes first
    let (status, _) = post_json(&client, "/api/chat", r#"{"message": ""}"#).await;
    assert_eq!(status, Status::BadRequest);
}

#[tokio::test]
async fn test_two_exchanges_store_four_messages() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(COMPLETION)
        .expect(2)
        .create_async()
        .await;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let client = client_with(Arc::clone(&store), Some(responder_for(server.url(), Arc::clone(&store)))).await;

    let (status, json) = post_json(&client, "/api/chat", r#"{"message": "q1", "sessionId": "s-1"}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["message"], "Gensyn is a compute protocol.");
    assert_eq!(json["sessionId"], "s-1");

    let (status, _) = post_json(&client, "/api/chat", r#"{"message": "q2", "sessionId": "s-1"}"#).await;
    assert_eq!(status, Status::Ok);

    let conversation = store.get_conversation("s-1").await.unwrap().unwrap();
    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(conversation.messages[0].content, "q1");
    assert_eq!(conversation.messages[2].content, "q2");
    assert!(conversation
        .messages
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));

    upstream.assert_async().await;
}

/// Conversation storage is down; everything else goes to memory.
#[derive(Default)]
struct BrokenConversations {
    inner: MemoryStore,
}

fn unavailable() -> StoreError {
    StoreError::Corrupt("conversation table unavailable".into())
}

#[async_trait::async_trait]
impl Store for BrokenConversations {
    async fn get_conversation(&self, _session_id: &str) -> StoreResult<Option<Conversation>> {
        Err(unavailable())
    }

    async fn create_conversation(&self, _conversation: NewConversation) -> StoreResult<Conversation> {
        Err(unavailable())
    }

    async fn update_conversation(&self, _session_id: &str, _messages: Vec<ChatMessage>) -> StoreResult<Conversation> {
        Err(unavailable())
    }

    async fn subscribe_newsletter(&self, email: &str) -> StoreResult<NewsletterSubscription> {
        self.inner.subscribe_newsletter(email).await
    }

    async fn is_subscribed(&self, email: &str) -> StoreResult<bool> {
        self.inner.is_subscribed(email).await
    }

    async fn create_feedback(&self, feedback: NewFeedback) -> StoreResult<Feedback> {
        self.inner.create_feedback(feedback).await
    }

    async fn create_content_update(&self, update: NewContentUpdate) -> StoreResult<ContentUpdate> {
        self.inner.create_content_update(update).await
    }

    async fn get_content_updates(&self, limit: usize, source: Option<Source>) -> StoreResult<Vec<ContentUpdate>> {
        self.inner.get_content_updates(limit, source).await
    }

    async fn latest_update_by_source(&self, source: Source, kind: UpdateKind) -> StoreResult<Option<ContentUpdate>> {
        self.inner.latest_update_by_source(source, kind).await
    }

    async fn find_content_update_by_url(&self, url: &str) -> StoreResult<Option<ContentUpdate>> {
        self.inner.find_content_update_by_url(url).await
    }
}

#[tokio::test]
async fn test_chat_replies_when_conversation_cannot_be_saved() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(COMPLETION)
        .expect(2)
        .create_async()
        .await;

    let store: Arc<dyn Store> = Arc::new(BrokenConversations::default());
    let client = client_with(Arc::clone(&store), Some(responder_for(server.url(), Arc::clone(&store)))).await;

    // no stored history to load, then nothing to update
    let (status, json) = post_json(&client, "/api/chat", r#"{"message": "q1", "sessionId": "s-3"}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["message"], "Gensyn is a compute protocol.");
    assert_eq!(json["sessionId"], "s-3");

    // explicit history skips the load; the save still fails quietly
    let (status, json) = post_json(
        &client,
        "/api/chat",
        r#"{"message": "q2", "sessionId": "s-3", "history": [{"role": "user", "content": "q1"}]}"#,
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["message"], "Gensyn is a compute protocol.");

    upstream.assert_async().await;
}

#[tokio::test]
async fn test_chat_generates_session_id_when_missing() {
    let mut server = mockito::Server::new_async().await;
    let _upstream = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(COMPLETION)
        .create_async()
        .await;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let client = client_with(Arc::clone(&store), Some(responder_for(server.url(), Arc::clone(&store)))).await;

    let (status, json) = post_json(&client, "/api/chat", r#"{"message": "hello"}"#).await;
    assert_eq!(status, Status::Ok);
    let session_id = json["sessionId"].as_str().unwrap();
    assert!(!session_id.is_empty());
    assert!(store.get_conversation(session_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_chat_upstream_rejection_points_at_credential() {
    let mut server = mockito::Server::new_async().await;
    let _upstream = server
        .mock("POST", "/")
        .with_status(401)
        .with_body(r#"{"error": {"message": "Invalid API Key"}}"#)
        .create_async()
        .await;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let client = client_with(Arc::clone(&store), Some(responder_for(server.url(), Arc::clone(&store)))).await;

    let (status, json) = post_json(&client, "/api/chat", r#"{"message": "hello", "sessionId": "s-2"}"#).await;
    assert_eq!(status, Status::InternalServerError);
    assert_eq!(json["error"], "Failed to process chat message");
    assert!(json["details"].as_str().unwrap().contains("401"));
    assert!(json["hint"].as_str().unwrap().contains("GROQ_API_KEY"));
    assert!(store.get_conversation("s-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_updates_listing_and_validation() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    for i in 0..5 {
        store
            .create_content_update(
                NewContentUpdate::new(Source::Blog, UpdateKind::Article, "body", Utc::now() - Duration::hours(i))
                    .url(format!("https://example.com/{}", i)),
            )
            .await
            .unwrap();
    }
    let client = client_with(store, None).await;

    let (status, json) = get_json(&client, "/api/updates?limit=2").await;
    assert_eq!(status, Status::Ok);
    let updates = json["updates"].as_array().unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["url"], "https://example.com/0");
    assert_eq!(updates[1]["url"], "https://example.com/1");

    let (_, json) = get_json(&client, "/api/updates?source=blog").await;
    assert_eq!(json["updates"].as_array().unwrap().len(), 5);

    let (status, _) = get_json(&client, "/api/updates?limit=abc").await;
    assert_eq!(status, Status::BadRequest);
    let (status, json) = get_json(&client, "/api/updates?source=twitter").await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(json["error"], "Invalid source");
}

#[tokio::test]
async fn test_auto_fetch_controls() {
    let client = client_with(Arc::new(MemoryStore::new()), None).await;

    let (status, _) = post_json(&client, "/api/updates/auto-fetch/start", r#"{"intervalMinutes": 0}"#).await;
    assert_eq!(status, Status::BadRequest);

    let (status, json) = post_json(&client, "/api/updates/auto-fetch/start", r#"{}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["started"], true);
    assert_eq!(json["intervalMinutes"], 30);

    let (_, json) = post_json(&client, "/api/updates/auto-fetch/start", r#"{"intervalMinutes": 5}"#).await;
    assert_eq!(json["started"], false);

    let (_, json) = get_json(&client, "/api/updates/status").await;
    assert_eq!(json["isRunning"], true);
    assert_eq!(json["interval"], "active");
    assert_eq!(json["intervalMinutes"], 30);

    let (_, json) = post_json(&client, "/api/updates/auto-fetch/stop", "").await;
    assert_eq!(json["stopped"], true);
    let (_, json) = post_json(&client, "/api/updates/auto-fetch/stop", "").await;
    assert_eq!(json["stopped"], false);

    let (_, json) = get_json(&client, "/api/updates/status").await;
    assert_eq!(json["isRunning"], false);
    assert_eq!(json["interval"], "inactive");
}

#[tokio::test]
async fn test_manual_fetch_returns_report() {
    let client = client_with(Arc::new(MemoryStore::new()), None).await;

    let (status, json) = post_json(&client, "/api/updates/fetch", "").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["message"], "Content fetch triggered successfully");
    assert_eq!(json["report"]["inserted"], 0);

    let (_, json) = get_json(&client, "/api/updates/status").await;
    assert!(json["lastCycle"].is_object());
}

#[tokio::test]
async fn test_newsletter_and_feedback() {
    let client = client_with(Arc::new(MemoryStore::new()), None).await;

    let (status, _) = post_json(&client, "/api/newsletter", r#"{"email": "not-an-email"}"#).await;
    assert_eq!(status, Status::BadRequest);

    let (status, json) = post_json(&client, "/api/newsletter", r#"{"email": "a@example.com"}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["subscription"]["email"], "a@example.com");

    let (status, json) = post_json(&client, "/api/newsletter", r#"{"email": "a@example.com"}"#).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["message"], "Already subscribed");
    assert!(json["subscription"].is_null());

    let (status, _) = post_json(&client, "/api/feedback", r#"{"email": "a@example.com", "message": "hi"}"#).await;
    assert_eq!(status, Status::BadRequest);

    let (status, json) = post_json(
        &client,
        "/api/feedback",
        r#"{"name": "Ada", "email": "a@example.com", "message": "Great site", "category": "general"}"#,
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(json["name"], "Ada");
    assert_eq!(json["category"], "general");
}

#[tokio::test]
async fn test_health() {
    let client = client_with(Arc::new(MemoryStore::new()), None).await;
    let response = client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.as_deref(), Some("OK"));
}
