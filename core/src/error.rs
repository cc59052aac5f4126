//! Error types for the requester.
//!
//! # Design
//! Every failure is logged where it is detected and then returned as a
//! `RequestError`, so callers can tell a dead connection from a maintenance
//! page from a malformed payload. `FailureKind` is the cause without the
//! payload, for callers that only want to branch.

use crate::http::HttpMethod;

/// Failure to complete the HTTP round-trip itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, timeout, TLS error and the like.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered but the body could not be read off the wire.
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Errors returned by the `Requester` verb methods.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: HttpMethod,
        url: String,
        #[source]
        source: TransportError,
    },

    /// The final body was not JSON of the requested shape.
    #[error("could not decode response body: {source}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    /// Both the first attempt and the retry returned an HTML page.
    #[error("{method} {url} returned HTML after retrying")]
    HtmlRetryExhausted {
        method: HttpMethod,
        url: String,
        body: String,
    },

    #[error("response with status {status} had no body")]
    EmptyBody { status: u16 },

    /// The pause before the HTML retry was interrupted by a `CancelToken`.
    #[error("{method} {url} cancelled before retrying")]
    Cancelled { method: HttpMethod, url: String },

    /// The request payload could not be serialized to JSON.
    #[error("could not serialize request body: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Cause of a `RequestError`, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Decode,
    HtmlRetryExhausted,
    EmptyBody,
    Cancelled,
    Serialize,
}

impl RequestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RequestError::Transport { .. } => FailureKind::Transport,
            RequestError::Decode { .. } => FailureKind::Decode,
            RequestError::HtmlRetryExhausted { .. } => FailureKind::HtmlRetryExhausted,
            RequestError::EmptyBody { .. } => FailureKind::EmptyBody,
            RequestError::Cancelled { .. } => FailureKind::Cancelled,
            RequestError::Serialize(_) => FailureKind::Serialize,
        }
    }

    /// Raw response body, for the variants that received one.
    pub fn body(&self) -> Option<&str> {
        match self {
            RequestError::Decode { body, .. } | RequestError::HtmlRetryExhausted { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }
}
