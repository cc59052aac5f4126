//! The blocking requester that fronts every call to the REST API.
//!
//! # Design
//! `Requester` holds no per-call state: a shared `ApiSession` (token read
//! fresh on every call), the fixed user agent, the auth policy and a
//! `Transport`. One value can serve any number of threads.
//!
//! Each verb comes in an object flavour (`get`, `post`, ...) and an array
//! flavour (`get_array`, `post_array`, ...) that differ only in the JSON
//! shape the body is decoded into. Status codes are not interpreted; whatever
//! body the API returns is decoded.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::config::{AuthPolicy, RequesterConfig};
use crate::delay::CancelToken;
use crate::error::RequestError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::session::ApiSession;
use crate::transport::UreqTransport;

pub type JsonObject = serde_json::Map<String, Value>;
pub type JsonArray = Vec<Value>;

/// Synchronous requester for the REST API.
#[derive(Debug)]
pub struct Requester<T: Transport = UreqTransport> {
    session: Arc<ApiSession>,
    transport: T,
    auth: AuthPolicy,
    user_agent: String,
    retry_delay: Duration,
    cancel: CancelToken,
}

impl Requester<UreqTransport> {
    pub fn new(session: Arc<ApiSession>) -> Self {
        Self::with_config(session, &RequesterConfig::default())
    }

    pub fn with_config(session: Arc<ApiSession>, config: &RequesterConfig) -> Self {
        let transport = UreqTransport::with_timeout(config.timeout_ms.map(Duration::from_millis));
        Self::with_transport(session, config, transport)
    }
}

impl<T: Transport> Requester<T> {
    pub fn with_transport(session: Arc<ApiSession>, config: &RequesterConfig, transport: T) -> Self {
        let user_agent = config.user_agent(session.version());
        Self {
            session,
            transport,
            auth: config.auth_policy(),
            user_agent,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            cancel: CancelToken::new(),
        }
    }

    pub fn session(&self) -> &Arc<ApiSession> {
        &self.session
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Handle that interrupts pending retry pauses. Cancelling it makes every
    /// later HTML retry on this requester fail with `RequestError::Cancelled`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn get(&self, url: &str) -> Result<JsonObject, RequestError> {
        self.send(HttpMethod::Get, url, None)
    }

    pub fn delete(&self, url: &str) -> Result<JsonObject, RequestError> {
        self.send(HttpMethod::Delete, url, None)
    }

    pub fn post(&self, url: &str, body: &JsonObject) -> Result<JsonObject, RequestError> {
        self.send(HttpMethod::Post, url, Some(to_json(body)?))
    }

    /// `body` may be an object or an array.
    pub fn patch(&self, url: &str, body: &Value) -> Result<JsonObject, RequestError> {
        self.send(HttpMethod::Patch, url, Some(to_json(body)?))
    }

    pub fn put(&self, url: &str, body: &JsonObject) -> Result<JsonObject, RequestError> {
        self.send(HttpMethod::Put, url, Some(to_json(body)?))
    }

    pub fn get_array(&self, url: &str) -> Result<JsonArray, RequestError> {
        self.send(HttpMethod::Get, url, None)
    }

    pub fn delete_array(&self, url: &str) -> Result<JsonArray, RequestError> {
        self.send(HttpMethod::Delete, url, None)
    }

    pub fn post_array(&self, url: &str, body: &JsonObject) -> Result<JsonArray, RequestError> {
        self.send(HttpMethod::Post, url, Some(to_json(body)?))
    }

    pub fn patch_array(&self, url: &str, body: &Value) -> Result<JsonArray, RequestError> {
        self.send(HttpMethod::Patch, url, Some(to_json(body)?))
    }

    pub fn put_array(&self, url: &str, body: &JsonObject) -> Result<JsonArray, RequestError> {
        self.send(HttpMethod::Put, url, Some(to_json(body)?))
    }

    /// Build the outbound request with the standard headers attached.
    ///
    /// Header order: `authorization` (token set and host allowed),
    /// `Content-Type` (every method but GET), `user-agent`, `Accept-Encoding`.
    pub fn build_request(&self, method: HttpMethod, url: &str, body: Option<String>) -> HttpRequest {
        let mut request = HttpRequest::new(method, url);
        if let Some(token) = self.session.token() {
            if self.auth.allows(url) {
                request.set_header("authorization", &token);
            }
        }
        if method != HttpMethod::Get {
            request.set_header("Content-Type", "application/json");
        }
        request.set_header("user-agent", &self.user_agent);
        request.set_header("Accept-Encoding", "gzip");
        request.body = body;
        request
    }

    fn send<R: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<String>,
    ) -> Result<R, RequestError> {
        let request = self.build_request(method, url, body);
        let response = self.dispatch(&request)?;

        let Some(body) = response.body else {
            debug!(%method, url = %url, status = response.status, "response had no body");
            return Err(RequestError::EmptyBody {
                status: response.status,
            });
        };

        match serde_json::from_str(&body) {
            Ok(parsed) => Ok(parsed),
            Err(source) => {
                error!(%method, url = %url, body = %body, error = %source, "response body is not the expected JSON");
                Err(RequestError::Decode { body, source })
            }
        }
    }

    /// Send `request`, re-sending it once after the retry delay if the first
    /// body looks like an HTML page.
    fn dispatch(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        let mut response = self.execute(request)?;

        let retried = response.body.as_deref().is_some_and(looks_like_html);
        if retried {
            debug!(method = %request.method, url = %request.url, "response was HTML, retrying");
            if !self.cancel.wait(self.retry_delay) {
                debug!(method = %request.method, url = %request.url, "retry cancelled");
                return Err(RequestError::Cancelled {
                    method: request.method,
                    url: request.url.clone(),
                });
            }
            response = self.execute(request)?;
        }

        trace!(
            method = %request.method,
            url = %request.url,
            payload = %request.body.as_deref().unwrap_or("None"),
            status = response.status,
            response = %response.body.as_deref().unwrap_or("None"),
            "request completed"
        );

        if retried {
            if let Some(body) = response.body.as_deref().filter(|b| looks_like_html(b)) {
                error!(method = %request.method, url = %request.url, body = %body, "response was still HTML after retrying");
                return Err(RequestError::HtmlRetryExhausted {
                    method: request.method,
                    url: request.url.clone(),
                    body: body.to_string(),
                });
            }
        }

        Ok(response)
    }

    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        self.transport.execute(request).map_err(|source| {
            debug!(method = %request.method, url = %request.url, error = %source, "request failed");
            RequestError::Transport {
                method: request.method,
                url: request.url.clone(),
                source,
            }
        })
    }
}

/// An error or interstitial page served where JSON was expected.
fn looks_like_html(body: &str) -> bool {
    body.starts_with('<')
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<String, RequestError> {
    serde_json::to_string(body).map_err(RequestError::Serialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, TransportError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Replays canned responses in order and records every request sent.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn replying(bodies: &[&str]) -> Arc<Self> {
            let transport = Self::default();
            for body in bodies {
                transport.push(Ok(HttpResponse {
                    status: 200,
                    body: Some(body.to_string()),
                }));
            }
            Arc::new(transport)
        }

        fn push(&self, response: Result<HttpResponse, TransportError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("no scripted response".into())))
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        (result, logs)
    }

    fn requester(
        token: Option<&str>,
        transport: &Arc<ScriptedTransport>,
    ) -> Requester<Arc<ScriptedTransport>> {
        let session = match token {
            Some(token) => ApiSession::with_token("2.0.0", token),
            None => ApiSession::new("2.0.0"),
        };
        Requester::with_transport(
            Arc::new(session),
            &RequesterConfig::default(),
            Arc::clone(transport),
        )
    }

    #[test]
    fn get_attaches_token_for_api_host() {
        let transport = ScriptedTransport::replying(&[r#"{"id":"1"}"#]);
        let result = requester(Some("T"), &transport)
            .get("https://discordapp.com/api/users/@me")
            .unwrap();

        assert_eq!(Value::Object(result), json!({"id": "1"}));
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(sent[0].header("authorization"), Some("T"));
        assert!(sent[0].header("Content-Type").is_none());
        assert!(sent[0].body.is_none());
    }

    #[test]
    fn token_is_withheld_from_foreign_hosts() {
        let transport = ScriptedTransport::replying(&["{}"]);
        requester(Some("T"), &transport)
            .get("https://example.com/discordapp.com/api")
            .unwrap();
        assert!(transport.sent()[0].header("authorization").is_none());
    }

    #[test]
    fn cdn_host_receives_token() {
        let transport = ScriptedTransport::replying(&["[]"]);
        requester(Some("T"), &transport)
            .get_array("https://cdn.discordapp.com/emojis/list")
            .unwrap();
        assert_eq!(transport.sent()[0].header("authorization"), Some("T"));
    }

    #[test]
    fn token_changes_are_seen_by_the_next_call() {
        let transport = ScriptedTransport::replying(&["{}", "{}"]);
        let requester = requester(None, &transport);
        requester.get("https://discordapp.com/api/gateway").unwrap();
        requester.session().set_token("fresh");
        requester.get("https://discordapp.com/api/gateway").unwrap();

        let sent = transport.sent();
        assert!(sent[0].header("authorization").is_none());
        assert_eq!(sent[1].header("authorization"), Some("fresh"));
    }

    #[test]
    fn every_request_has_user_agent_and_gzip() {
        let transport = ScriptedTransport::replying(&["{}", "{}", "{}", "{}", "{}"]);
        let r = requester(None, &transport);
        let url = "https://example.org/anything";
        let body = JsonObject::new();
        r.get(url).unwrap();
        r.delete(url).unwrap();
        r.post(url, &body).unwrap();
        r.patch(url, &json!([])).unwrap();
        r.put(url, &body).unwrap();

        for req in transport.sent() {
            assert_eq!(
                req.header("user-agent"),
                Some("JDA DiscordBot (https://github.com/DV8FromTheWorld/JDA, 2.0.0)")
            );
            assert_eq!(req.header("Accept-Encoding"), Some("gzip"));
            if req.method == HttpMethod::Get {
                assert!(req.header("Content-Type").is_none());
            } else {
                assert_eq!(req.header("Content-Type"), Some("application/json"), "{}", req.method);
            }
        }
    }

    #[test]
    fn bodies_are_compact_json() {
        let transport = ScriptedTransport::replying(&["{}", "[]"]);
        let r = requester(None, &transport);
        let mut body = JsonObject::new();
        body.insert("name".into(), json!("x"));
        body.insert("tags".into(), json!([1, 2]));
        r.post("https://discordapp.com/api/guilds", &body).unwrap();
        r.patch_array("https://discordapp.com/api/guilds/1/roles", &json!([{"id": "2", "position": 1}]))
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].body.as_deref(), Some(r#"{"name":"x","tags":[1,2]}"#));
        assert_eq!(sent[1].method, HttpMethod::Patch);
        assert_eq!(sent[1].body.as_deref(), Some(r#"[{"id":"2","position":1}]"#));
    }

    #[test]
    fn html_response_is_retried_once_with_identical_request() {
        let transport = ScriptedTransport::replying(&["<html>bad gateway</html>", r#"{"ok":true}"#]);
        let mut body = JsonObject::new();
        body.insert("name".into(), json!("x"));

        let start = Instant::now();
        let result = requester(None, &transport)
            .post("https://discordapp.com/api/guilds", &body)
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        assert_eq!(Value::Object(result), json!({"ok": true}));
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert!(sent[0].header("authorization").is_none());
        assert_eq!(sent[0].header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn html_twice_gives_up_after_one_retry() {
        let transport = ScriptedTransport::replying(&["<html>1</html>", "<html>2</html>", "{}"]);
        let (result, logs) = capture_logs(|| {
            requester(None, &transport).get("https://discordapp.com/api/gateway")
        });

        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::HtmlRetryExhausted);
        assert_eq!(err.body(), Some("<html>2</html>"));
        assert_eq!(transport.sent().len(), 2);
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("retrying"));
    }

    #[test]
    fn html_retry_that_fails_in_transport_reports_transport() {
        let transport = ScriptedTransport::replying(&["<!DOCTYPE html>"]);
        let err = requester(None, &transport)
            .get_array("https://discordapp.com/api/guilds")
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn cancelled_token_abandons_retry() {
        let transport = ScriptedTransport::replying(&["<html></html>", "{}"]);
        let r = requester(None, &transport);
        r.cancel_token().cancel();

        let err = r.get("https://discordapp.com/api/gateway").unwrap_err();
        assert!(matches!(err, RequestError::Cancelled { method: HttpMethod::Get, .. }));
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn transport_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Err(TransportError::Network("connection reset".into())));

        let (result, logs) = capture_logs(|| {
            requester(None, &transport).delete("https://discordapp.com/api/channels/1")
        });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
        assert_eq!(transport.sent().len(), 1);
        assert!(logs.contains("connection reset"));
    }

    #[test]
    fn malformed_json_is_logged_with_raw_body() {
        let transport = ScriptedTransport::replying(&["not json"]);
        let (result, logs) = capture_logs(|| {
            requester(None, &transport).get("https://discordapp.com/api/gateway")
        });

        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Decode);
        assert_eq!(err.body(), Some("not json"));
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("not json"));
    }

    #[test]
    fn wrong_shape_is_a_decode_error() {
        let transport = ScriptedTransport::replying(&["[1,2]", r#"{"a":1}"#]);
        let r = requester(None, &transport);
        assert_eq!(
            r.get("https://discordapp.com/api/x").unwrap_err().kind(),
            FailureKind::Decode
        );
        assert_eq!(
            r.get_array("https://discordapp.com/api/x").unwrap_err().kind(),
            FailureKind::Decode
        );
    }

    #[test]
    fn array_variant_returns_parsed_array() {
        let transport = ScriptedTransport::replying(&[r#"[{"id":"1"},{"id":"2"}]"#]);
        let list = requester(Some("T"), &transport)
            .get_array("https://discordapp.com/api/users/@me/guilds")
            .unwrap();
        assert_eq!(Value::Array(list), json!([{"id": "1"}, {"id": "2"}]));
    }

    #[test]
    fn empty_body_is_reported_with_status() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Ok(HttpResponse {
            status: 204,
            body: None,
        }));
        let err = requester(Some("T"), &transport)
            .delete("https://discordapp.com/api/channels/1/messages/2")
            .unwrap_err();
        assert!(matches!(err, RequestError::EmptyBody { status: 204 }));
    }

    #[test]
    fn error_status_bodies_are_still_decoded() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Ok(HttpResponse {
            status: 429,
            body: Some(r#"{"retry_after":1200}"#.into()),
        }));
        let result = requester(None, &transport)
            .get("https://discordapp.com/api/gateway")
            .unwrap();
        assert_eq!(result["retry_after"], 1200);
    }

    #[test]
    fn trace_log_records_request_and_response() {
        let transport = ScriptedTransport::replying(&[r#"{"id":"42"}"#]);
        let mut body = JsonObject::new();
        body.insert("content".into(), json!("hi"));
        let (_, logs) = capture_logs(|| {
            requester(None, &transport)
                .put("https://discordapp.com/api/channels/1/pins/42", &body)
                .unwrap()
        });
        assert!(logs.contains("TRACE"));
        assert!(logs.contains("PUT"));
        assert!(logs.contains("https://discordapp.com/api/channels/1/pins/42"));
        assert!(logs.contains(r#"{"id":"42"}"#));
    }

    #[test]
    fn concurrent_calls_are_independent() {
        let bodies: Vec<&str> = std::iter::repeat("{}").take(16).collect();
        let transport = ScriptedTransport::replying(&bodies);
        let r = requester(Some("T"), &transport);

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| r.get("https://discordapp.com/api/gateway").unwrap());
            }
        });
        assert_eq!(transport.sent().len(), 16);
    }
}
