//! Blocking `Transport` backed by ureq.

use std::time::Duration;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// Default transport: one shared `ureq::Agent` (connection pool included).
///
/// HTTP error statuses are handed back as data so the requester decodes
/// whatever body the server produced. Gzip-encoded bodies are inflated by
/// ureq's `gzip` feature.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// `timeout` bounds the whole call (connect, send and body read).
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = &self.agent;
        let url = req.url.as_str();
        let body = req.body.as_deref();

        let result = match (req.method, body) {
            (HttpMethod::Get, _) => with_headers(agent.get(url), &req.headers).call(),
            (HttpMethod::Delete, _) => with_headers(agent.delete(url), &req.headers).call(),
            (HttpMethod::Post, Some(body)) => {
                with_headers(agent.post(url), &req.headers).send(body.as_bytes())
            }
            (HttpMethod::Post, None) => with_headers(agent.post(url), &req.headers).send_empty(),
            (HttpMethod::Put, Some(body)) => {
                with_headers(agent.put(url), &req.headers).send(body.as_bytes())
            }
            (HttpMethod::Put, None) => with_headers(agent.put(url), &req.headers).send_empty(),
            (HttpMethod::Patch, Some(body)) => {
                with_headers(agent.patch(url), &req.headers).send(body.as_bytes())
            }
            (HttpMethod::Patch, None) => with_headers(agent.patch(url), &req.headers).send_empty(),
        };
        let mut response = result.map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        // Invalid UTF-8 is replaced rather than rejected; a body mangled that
        // way fails (and is logged) in the JSON decode step like any other.
        let text = String::from_utf8_lossy(&bytes).into_owned();

        Ok(HttpResponse {
            status,
            body: (!text.is_empty()).then_some(text),
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}
