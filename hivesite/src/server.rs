use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chat::ChatResponder;
use crate::models::{
    ChatMessage, ContentUpdate, Feedback, NewConversation, NewFeedback, NewsletterSubscription,
    Role, Source,
};
use crate::scheduler::{AutoFetcher, FetcherStatus, DEFAULT_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES};
use crate::storage::{Store, StoreError};

pub const DEFAULT_UPDATES_LIMIT: usize = 50;
pub const MAX_UPDATES_LIMIT: usize = 200;

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// `None` when the LLM credential is missing; chat then answers with a configuration error
    pub responder: Option<Arc<ChatResponder>>,
    pub fetcher: Arc<AutoFetcher>,
    /// Name of the env var the LLM credential is read from, echoed in error hints
    pub credential_env: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        responder: Option<Arc<ChatResponder>>,
        fetcher: Arc<AutoFetcher>,
        credential_env: impl Into<String>,
    ) -> Self {
        Self {
            store,
            responder,
            fetcher,
            credential_env: credential_env.into(),
        }
    }
}

/// JSON error body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: Status,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: Status, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                details: None,
                hint: None,
            },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, error)
    }

    pub fn internal(error: impl Into<String>, details: impl ToString) -> Self {
        Self::new(Status::InternalServerError, error).details(details)
    }

    fn details(mut self, details: impl ToString) -> Self {
        self.body.details = Some(details.to_string());
        self
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.body.hint = Some(hint.into());
        self
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        (self.status, Json(self.body)).respond_to(req)
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Validated `/api/chat` payload
#[derive(Debug)]
pub struct ChatInput {
    pub message: String,
    pub session_id: Option<String>,
    pub history: Option<Vec<ChatMessage>>,
}

fn parse_history_entry(entry: &Value) -> Option<ChatMessage> {
    let role = entry.get("role")?.as_str()?.parse::<Role>().ok()?;
    let content = entry.get("content")?.as_str()?;
    let timestamp = match entry.get("timestamp") {
        None | Some(Value::Null) => Utc::now().timestamp_millis(),
        Some(ts) => ts.as_i64()?,
    };
    Some(ChatMessage {
        role,
        content: content.to_string(),
        timestamp,
    })
}

/// Check the chat body by hand so a wrong type is a 400 like a missing field.
pub fn validate_chat_request(body: &Value) -> std::result::Result<ChatInput, ApiError> {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("Message is required"))?;

    let session_id = match body.get("sessionId") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(ApiError::bad_request("sessionId must be a string")),
    };

    let history = match body.get("history") {
        None | Some(Value::Null) => None,
        Some(Value::Array(entries)) => Some(
            entries
                .iter()
                .map(parse_history_entry)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    ApiError::bad_request("Invalid history format")
                        .details("each entry needs role \"user\" or \"assistant\" and string content")
                })?,
        ),
        Some(_) => return Err(ApiError::bad_request("Invalid history format").details("history must be an array")),
    };

    Ok(ChatInput {
        message: message.to_string(),
        session_id,
        history,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatReply {
    message: String,
    session_id: String,
}

/// Append the exchange to the session's conversation. Failures are logged, never surfaced.
async fn persist_exchange(store: &dyn Store, session_id: &str, user: ChatMessage, assistant: ChatMessage) {
    let existing = match store.get_conversation(session_id).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(%session_id, "chat: could not load conversation, reply not persisted: {}", e);
            return;
        }
    };

    let result = match existing {
        Some(conversation) => {
            let mut messages = conversation.messages;
            messages.push(user);
            messages.push(assistant);
            store.update_conversation(session_id, messages).await.map(|_| ())
        }
        None => store
            .create_conversation(NewConversation {
                session_id: session_id.to_string(),
                messages: vec![user, assistant],
            })
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        warn!(%session_id, "chat: failed to persist conversation: {}", e);
    }
}

#[post("/api/chat", data = "<body>")]
async fn chat(state: &State<AppState>, body: Json<Value>) -> ApiResult<ChatReply> {
    let input = validate_chat_request(&body)?;

    let Some(responder) = state.responder.as_ref() else {
        error!("chat: {} is not set, cannot answer", state.credential_env);
        return Err(ApiError::internal(
            "Server configuration error",
            format!("{} is not configured", state.credential_env),
        )
        .hint(format!(
            "Set the {} environment variable and restart the server",
            state.credential_env
        )));
    };

    let session_id = input
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let history = match input.history {
        Some(history) => history,
        None => match state.store.get_conversation(&session_id).await {
            Ok(conversation) => conversation.map(|c| c.messages).unwrap_or_default(),
            Err(e) => {
                warn!(%session_id, "chat: could not load stored history: {}", e);
                Vec::new()
            }
        },
    };

    let user_message = ChatMessage::new(Role::User, input.message.clone());
    let reply = responder.respond(&input.message, &history).await.map_err(|e| {
        error!(%session_id, "chat: upstream failure: {}", e);
        let api_error = ApiError::internal("Failed to process chat message", &e);
        if e.is_credential_problem() {
            api_error.hint(format!("Check that {} holds a valid API key", state.credential_env))
        } else {
            api_error
        }
    })?;

    persist_exchange(
        state.store.as_ref(),
        &session_id,
        user_message,
        ChatMessage::new(Role::Assistant, reply.clone()),
    )
    .await;

    Ok(Json(ChatReply {
        message: reply,
        session_id,
    }))
}

#[derive(Serialize)]
struct UpdatesResponse {
    updates: Vec<ContentUpdate>,
}

fn parse_limit(raw: Option<&str>) -> std::result::Result<usize, ApiError> {
    match raw {
        None => Ok(DEFAULT_UPDATES_LIMIT),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(|n| n.min(MAX_UPDATES_LIMIT))
            .ok_or_else(|| ApiError::bad_request("Invalid limit").details("limit must be a positive integer")),
    }
}

#[get("/api/updates?<limit>&<source>")]
async fn list_updates(
    state: &State<AppState>,
    limit: Option<String>,
    source: Option<String>,
) -> ApiResult<UpdatesResponse> {
    let limit = parse_limit(limit.as_deref())?;
    let source = source
        .map(|s| s.parse::<Source>())
        .transpose()
        .map_err(|e| ApiError::bad_request("Invalid source").details(e))?;

    let updates = state.store.get_content_updates(limit, source).await.map_err(|e| {
        error!("updates: store failure: {}", e);
        ApiError::internal("Failed to fetch updates", e)
    })?;

    Ok(Json(UpdatesResponse { updates }))
}

#[post("/api/updates/fetch")]
async fn trigger_fetch(state: &State<AppState>) -> Json<Value> {
    let report = state.fetcher.fetch_now().await;
    Json(json!({
        "message": "Content fetch triggered successfully",
        "report": report,
    }))
}

#[get("/api/updates/status")]
async fn fetch_status(state: &State<AppState>) -> Json<FetcherStatus> {
    Json(state.fetcher.status())
}

fn parse_interval(body: Option<&Value>) -> std::result::Result<u64, ApiError> {
    let invalid = || {
        ApiError::bad_request("Invalid interval")
            .details(format!("intervalMinutes must be an integer between 1 and {}", MAX_INTERVAL_MINUTES))
    };
    match body.and_then(|b| b.get("intervalMinutes")) {
        None | Some(Value::Null) => Ok(DEFAULT_INTERVAL_MINUTES),
        Some(value) => value
            .as_u64()
            .filter(|n| (1..=MAX_INTERVAL_MINUTES).contains(n))
            .ok_or_else(invalid),
    }
}

#[post("/api/updates/auto-fetch/start", data = "<body>")]
async fn start_auto_fetch(state: &State<AppState>, body: Option<Json<Value>>) -> std::result::Result<Json<Value>, ApiError> {
    let interval = parse_interval(body.as_deref())?;
    let started = state.fetcher.start(interval);
    let message = if started {
        format!("Auto-fetch started with {} minute interval", interval)
    } else {
        "Auto-fetch already running".to_string()
    };
    Ok(Json(json!({
        "message": message,
        "intervalMinutes": interval,
        "started": started,
    })))
}

#[post("/api/updates/auto-fetch/stop")]
async fn stop_auto_fetch(state: &State<AppState>) -> Json<Value> {
    let stopped = state.fetcher.stop();
    let message = if stopped { "Auto-fetch stopped" } else { "Auto-fetch was not running" };
    Json(json!({ "message": message, "stopped": stopped }))
}

fn required_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn is_plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    )
}

#[derive(Serialize)]
struct NewsletterResponse {
    message: &'static str,
    subscription: Option<NewsletterSubscription>,
}

#[post("/api/newsletter", data = "<body>")]
async fn subscribe_newsletter(state: &State<AppState>, body: Json<Value>) -> ApiResult<NewsletterResponse> {
    let email = required_str(&body, "email")
        .filter(|e| is_plausible_email(e))
        .ok_or_else(|| ApiError::bad_request("A valid email is required"))?;

    let store_error = |e: StoreError| {
        error!("newsletter: store failure: {}", e);
        ApiError::internal("Failed to subscribe", e)
    };

    if state.store.is_subscribed(email).await.map_err(store_error)? {
        return Ok(Json(NewsletterResponse {
            message: "Already subscribed",
            subscription: None,
        }));
    }

    let subscription = state.store.subscribe_newsletter(email).await.map_err(store_error)?;
    info!("newsletter: new subscription {}", subscription.id);
    Ok(Json(NewsletterResponse {
        message: "Subscribed",
        subscription: Some(subscription),
    }))
}

#[post("/api/feedback", data = "<body>")]
async fn submit_feedback(state: &State<AppState>, body: Json<Value>) -> ApiResult<Feedback> {
    let (Some(email), Some(message), Some(category)) = (
        required_str(&body, "email"),
        required_str(&body, "message"),
        required_str(&body, "category"),
    ) else {
        return Err(ApiError::bad_request("email, message and category are required"));
    };

    let feedback = state
        .store
        .create_feedback(NewFeedback {
            name: required_str(&body, "name").map(str::to_string),
            email: email.to_string(),
            message: message.to_string(),
            category: category.to_string(),
        })
        .await
        .map_err(|e| {
            error!("feedback: store failure: {}", e);
            ApiError::internal("Failed to submit feedback", e)
        })?;

    Ok(Json(feedback))
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[catch(default)]
fn json_catcher(status: Status, _req: &Request) -> (Status, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: status.reason().unwrap_or("Unknown error").to_string(),
            details: None,
            hint: None,
        }),
    )
}

/// Assemble the Rocket instance without launching it (used by tests as well).
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount(
            "/",
            routes![
                health,
                chat,
                list_updates,
                trigger_fetch,
                fetch_status,
                start_auto_fetch,
                stop_auto_fetch,
                subscribe_newsletter,
                submit_feedback,
            ],
        )
        .register("/", catchers![json_catcher])
}

pub async fn launch_rocket(state: AppState, server: &common::ServerConfig) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = server.port {
        fig = fig.merge(("port", port));
    }

    let _rocket = build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_validation_rejects_bad_messages() {
        for body in [json!({}), json!({"message": ""}), json!({"message": "   "}), json!({"message": 123})] {
            let err = validate_chat_request(&body).unwrap_err();
            assert_eq!(err.status, Status::BadRequest);
            assert_eq!(err.body.error, "Message is required");
        }
    }

    #[test]
    fn chat_validation_checks_history_shape() {
        let ok = validate_chat_request(&json!({
            "message": "hi",
            "sessionId": "s1",
            "history": [{"role": "user", "content": "a", "timestamp": 1}, {"role": "assistant", "content": "b"}]
        }))
        .unwrap();
        assert_eq!(ok.session_id.as_deref(), Some("s1"));
        assert_eq!(ok.history.unwrap().len(), 2);

        let bad_role = validate_chat_request(&json!({"message": "hi", "history": [{"role": "system", "content": "x"}]}));
        assert!(bad_role.is_err());
        let not_array = validate_chat_request(&json!({"message": "hi", "history": "nope"}));
        assert!(not_array.is_err());
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_UPDATES_LIMIT);
        assert_eq!(parse_limit(Some("5")).unwrap(), 5);
        assert_eq!(parse_limit(Some("5000")).unwrap(), MAX_UPDATES_LIMIT);
        assert!(parse_limit(Some("0")).is_err());
        assert!(parse_limit(Some("abc")).is_err());
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval(None).unwrap(), DEFAULT_INTERVAL_MINUTES);
        assert_eq!(parse_interval(Some(&json!({"intervalMinutes": 5}))).unwrap(), 5);
        assert!(parse_interval(Some(&json!({"intervalMinutes": 0}))).is_err());
        assert!(parse_interval(Some(&json!({"intervalMinutes": 1441}))).is_err());
        assert!(parse_interval(Some(&json!({"intervalMinutes": "ten"}))).is_err());
    }

    #[test]
    fn email_shape() {
        assert!(is_plausible_email("a@b.io"));
        assert!(!is_plausible_email("a@@b"));
        assert!(!is_plausible_email("@b"));
        assert!(!is_plausible_email("nobody"));
    }
}
