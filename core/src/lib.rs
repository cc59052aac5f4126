//! Blocking JSON requester for a REST API.
//!
//! # Overview
//! Every call the application makes to the API goes through `Requester`:
//! it attaches the auth token, protocol headers and user agent, sends the
//! request, retries once if an HTML page comes back where JSON was expected,
//! and decodes the body as a JSON object or array.
//!
//! # Design
//! - `Requester` is stateless apart from a shared `ApiSession`.
//! - Request building and I/O are split: `HttpRequest` / `HttpResponse` are
//!   plain data and a `Transport` performs the round-trip (`UreqTransport`
//!   by default).
//! - Failures are logged through `tracing` and returned as `RequestError`.

pub mod client;
pub mod config;
pub mod delay;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use client::{JsonArray, JsonObject, Requester};
pub use config::{AuthPolicy, RequesterConfig, DEFAULT_API_PREFIX};
pub use delay::CancelToken;
pub use error::{FailureKind, RequestError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use session::ApiSession;
pub use transport::UreqTransport;
