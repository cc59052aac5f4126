//! Axum server impersonating the REST API for requester tests.
//!
//! Besides a small in-memory message store it serves the awkward cases a
//! client has to survive: HTML error pages, bodies that are not JSON or not
//! UTF-8, empty responses, gzip-encoded and slow responses, and an endpoint
//! that is HTML on first contact only.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::{any, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::compression::CompressionLayer;
use uuid::Uuid;

pub const HTML_PAGE: &str = "<html><body><h1>502 Bad Gateway</h1></body></html>";
pub const GARBAGE_BODY: &str = "not json";
/// Valid JSON apart from a lone Latin-1 byte inside a string.
pub const LATIN1_BODY: &[u8] = b"{\"name\":\"caf\xe9\"}";
/// Not UTF-8 and not JSON.
pub const BINARY_BODY: &[u8] = b"\xff\xfe not json";
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: String,
    pub content: String,
    pub pinned: bool,
}

#[derive(Deserialize)]
pub struct CreateMessage {
    pub content: String,
}

#[derive(Deserialize)]
pub struct UpdateMessage {
    pub content: Option<String>,
}

/// What the server saw: method, path, headers (lower-case names) and the raw
/// body, `None` when empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Clone, Default)]
pub struct AppState {
    messages: Arc<RwLock<HashMap<Uuid, Message>>>,
    attempts: Arc<RwLock<HashMap<String, Vec<Echo>>>>,
}

pub fn app() -> Router {
    Router::new()
        .route("/api/users/@me", get(current_user))
        .route("/api/echo", any(echo))
        .route("/api/echo/array", any(echo_array))
        .route("/api/flaky/{key}", any(flaky))
        .route("/api/flaky/{key}/attempts", get(flaky_attempts))
        .route("/api/html", any(html_page))
        .route("/api/garbage", any(garbage))
        .route("/api/empty", any(empty))
        .route("/api/latin1", any(latin1))
        .route("/api/binary", any(binary))
        .route("/api/gzip", any(echo).layer(CompressionLayer::new()))
        .route("/api/slow", any(slow))
        .route(
            "/api/channels/{channel_id}/messages",
            get(list_messages).post(create_message),
        )
        .route(
            "/api/channels/{channel_id}/messages/{message_id}",
            get(get_message).patch(update_message).delete(delete_message),
        )
        .route("/api/channels/{channel_id}/pins", get(list_pins))
        .route("/api/channels/{channel_id}/pins/{message_id}", put(pin_message))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn record(method: &Method, uri: &Uri, headers: &HeaderMap, body: String) -> Echo {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Echo {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        headers,
        body: (!body.is_empty()).then_some(body),
    }
}

fn unknown_message() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "Unknown Message", "code": 10008})),
    )
        .into_response()
}

async fn current_user(headers: HeaderMap) -> Response {
    if !headers.contains_key("authorization") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "401: Unauthorized", "code": 0})),
        )
            .into_response();
    }
    Json(json!({"id": "1", "username": "mock-bot", "bot": true})).into_response()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Echo> {
    Json(record(&method, &uri, &headers, body))
}

async fn echo_array(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Vec<Echo>> {
    Json(vec![record(&method, &uri, &headers, body)])
}

/// HTML on the first request for `key`, an echo on every later one.
async fn flaky(
    State(state): State<AppState>,
    Path(key): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let seen = record(&method, &uri, &headers, body);
    let mut attempts = state.attempts.write().await;
    let log = attempts.entry(key).or_default();
    log.push(seen.clone());
    if log.len() == 1 {
        (StatusCode::BAD_GATEWAY, Html(HTML_PAGE)).into_response()
    } else {
        Json(seen).into_response()
    }
}

async fn flaky_attempts(State(state): State<AppState>, Path(key): Path<String>) -> Json<Vec<Echo>> {
    let attempts = state.attempts.read().await;
    Json(attempts.get(&key).cloned().unwrap_or_default())
}

async fn html_page() -> (StatusCode, Html<&'static str>) {
    (StatusCode::SERVICE_UNAVAILABLE, Html(HTML_PAGE))
}

async fn garbage() -> &'static str {
    GARBAGE_BODY
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn latin1() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], LATIN1_BODY)
}

async fn binary() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/octet-stream")], BINARY_BODY)
}

async fn slow() -> Json<serde_json::Value> {
    tokio::time::sleep(SLOW_DELAY).await;
    Json(json!({"slow": true}))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<Vec<Message>> {
    let messages = state.messages.read().await;
    Json(
        messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect(),
    )
}

async fn create_message(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(input): Json<CreateMessage>,
) -> (StatusCode, Json<Message>) {
    let message = Message {
        id: Uuid::new_v4(),
        channel_id,
        content: input.content,
        pinned: false,
    };
    state.messages.write().await.insert(message.id, message.clone());
    (StatusCode::CREATED, Json(message))
}

async fn get_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(String, Uuid)>,
) -> Response {
    let messages = state.messages.read().await;
    match messages.get(&message_id).filter(|m| m.channel_id == channel_id) {
        Some(message) => Json(message.clone()).into_response(),
        None => unknown_message(),
    }
}

async fn update_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(String, Uuid)>,
    Json(input): Json<UpdateMessage>,
) -> Response {
    let mut messages = state.messages.write().await;
    let Some(message) = messages
        .get_mut(&message_id)
        .filter(|m| m.channel_id == channel_id)
    else {
        return unknown_message();
    };
    if let Some(content) = input.content {
        message.content = content;
    }
    Json(message.clone()).into_response()
}

async fn delete_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(String, Uuid)>,
) -> Response {
    let mut messages = state.messages.write().await;
    if !messages
        .get(&message_id)
        .is_some_and(|m| m.channel_id == channel_id)
    {
        return unknown_message();
    }
    messages.remove(&message_id);
    StatusCode::NO_CONTENT.into_response()
}

async fn list_pins(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<Vec<Message>> {
    let messages = state.messages.read().await;
    Json(
        messages
            .values()
            .filter(|m| m.channel_id == channel_id && m.pinned)
            .cloned()
            .collect(),
    )
}

async fn pin_message(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(String, Uuid)>,
) -> Response {
    let mut messages = state.messages.write().await;
    let Some(message) = messages
        .get_mut(&message_id)
        .filter(|m| m.channel_id == channel_id)
    else {
        return unknown_message();
    };
    message.pinned = true;
    Json(message.clone()).into_response()
}
