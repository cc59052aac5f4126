//! Requester configuration and the authorization header policy.
//!
//! # Design
//! The core reads no files or environment variables. `RequesterConfig`
//! derives `Deserialize` with defaults so the owning application can load it
//! from whatever format it already uses and hand it over.

use serde::Deserialize;

/// Base URL of the REST API the requester talks to.
pub const DEFAULT_API_PREFIX: &str = "https://discordapp.com/api/";

pub const DEFAULT_CLIENT_NAME: &str = "JDA DiscordBot";
pub const DEFAULT_CLIENT_URL: &str = "https://github.com/DV8FromTheWorld/JDA";
pub const DEFAULT_API_DOMAIN: &str = "discordapp.com";
pub const DEFAULT_RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    pub client_name: String,
    pub client_url: String,
    /// Hosts equal to, or sub-hosts of, these domains get the auth token.
    pub api_domains: Vec<String>,
    pub retry_delay_ms: u64,
    /// Overall per-call timeout for the default transport.
    pub timeout_ms: Option<u64>,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_url: DEFAULT_CLIENT_URL.to_string(),
            api_domains: vec![DEFAULT_API_DOMAIN.to_string()],
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeout_ms: None,
        }
    }
}

impl RequesterConfig {
    /// `"{client_name} ({client_url}, {version})"`
    pub fn user_agent(&self, version: &str) -> String {
        format!("{} ({}, {})", self.client_name, self.client_url, version)
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::new(&self.api_domains)
    }
}

/// Decides which URLs may carry the `authorization` header.
///
/// A URL qualifies when its host is one of the configured domains or a
/// sub-host of one (`cdn.discordapp.com` for `discordapp.com`). Matching is on
/// the parsed host, so `discordapp.com.example.net` or a query string that
/// mentions the domain never qualifies. A URL that does not parse as an
/// `http::Uri` (an unencoded space or quote, for instance) has no host and so
/// never receives the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    domains: Vec<String>,
}

impl AuthPolicy {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, url: &str) -> bool {
        let Ok(uri) = url.parse::<ureq::http::Uri>() else {
            return false;
        };
        let Some(host) = uri.host() else {
            return false;
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}
